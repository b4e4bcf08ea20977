use anyhow::Result;

use super::{CliContext, TEMPLATE_DB};
use crate::core::config::ClientConfig;
use crate::core::terminal::{GuideSection, print_success, print_warn};

pub fn run_config_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "show" };
    match sub_cmd {
        "show" => {
            let c = &ctx.config;
            GuideSection::new("Client configuration")
                .status("api_url", &c.api_url)
                .status("poll_interval_ms", &c.poll_interval_ms.to_string())
                .status("max_poll_failures", &c.max_poll_failures.to_string())
                .status("request_timeout_secs", &c.request_timeout_secs.to_string())
                .status("page_size", &c.page_size.to_string())
                .status("log_level", &c.log_level)
                .blank()
                .status(
                    "config file",
                    &ClientConfig::path_in(&ctx.data_dir).display().to_string(),
                )
                .status(
                    "templates",
                    &ctx.data_dir.join(TEMPLATE_DB).display().to_string(),
                )
                .print();
            println!();
            Ok(())
        }
        "init" => {
            let path = ClientConfig::path_in(&ctx.data_dir);
            if path.exists() && !args.iter().any(|a| a == "--force") {
                print_warn(&format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
                return Ok(());
            }
            let written = ctx.config.save(&ctx.data_dir)?;
            print_success(&format!("Wrote {}", written.display()));
            Ok(())
        }
        "path" => {
            println!("{}", ctx.data_dir.display());
            Ok(())
        }
        _ => {
            GuideSection::new("mybulker config")
                .command("show", "Effective settings after file, environment and flags")
                .command("init", "Write config.toml with the effective settings (--force)")
                .command("path", "Print the data directory")
                .print();
            println!();
            Ok(())
        }
    }
}
