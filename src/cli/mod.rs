mod args;
mod config_cmd;
mod instances;
mod render;
mod results;
mod server;
mod tasks;
mod templates;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use console::style;

use crate::core::api::{ApiClient, ApiError};
use crate::core::config::ClientConfig;
use crate::core::templates::SqliteTemplateStore;
use crate::core::terminal::{GuideSection, print_error};
use crate::core::watch::WatchOptions;
use crate::platform::{NativePlatform, Platform};

pub(crate) const TEMPLATE_DB: &str = "templates.db";

fn print_help() {
    GuideSection::new("Tasks")
        .command("tasks list", "List query tasks (--name, --status, --favorite, --page)")
        .command("tasks show", "Show a task with per-SQL and per-database progress")
        .command("tasks create", "Create a task from SQL and target databases")
        .command("tasks run", "Run or re-run one or more tasks (--watch)")
        .command("tasks watch", "Follow a running task until it finishes")
        .command("tasks errors", "List failed executions with their errors")
        .command("tasks stats", "Server-side execution statistics")
        .command("tasks favorite", "Toggle the favorite flag")
        .command("tasks delete", "Delete tasks (--yes to skip the prompt)")
        .print();

    GuideSection::new("Instances")
        .command("instances list", "Registered MySQL instances (--name, --host)")
        .command("instances show", "One instance with its synced databases")
        .command("instances add", "Register an instance (--name --host --port --user)")
        .command("instances update", "Change an instance's settings")
        .command("instances delete", "Remove an instance (--yes)")
        .command("instances test", "Check that the server can connect")
        .command("instances sync", "Refresh the synced database list (--all)")
        .command("instances export", "Write instance records to JSON (--out)")
        .command("dashboard", "Instance count, task totals, recent and favorite tasks")
        .print();

    GuideSection::new("Results")
        .command("results show", "Page through one statement's merged results")
        .command("results export", "Download the CSV export (--out, --url-only)")
        .print();

    GuideSection::new("Templates")
        .command("templates list", "Saved creation templates, newest first")
        .command("templates show", "Print a template's values")
        .command("templates save", "Save creation flags under a name")
        .command("templates delete", "Remove a template")
        .print();

    GuideSection::new("Backend")
        .command("sql validate", "Check SQL syntax on the server")
        .command("sql split", "Show how SQL text is split into statements")
        .command("databases", "List synced databases of an instance (--instance)")
        .command("settings get", "Read an execution setting")
        .command("settings set", "Change an execution setting")
        .print();

    GuideSection::new("Client")
        .command("config show", "Effective client configuration")
        .command("config init", "Write a default config.toml")
        .command("config path", "Print the data directory")
        .blank()
        .text("Global: --api-url <url>  --verbose, -v  --log-file <path>")
        .print();

    println!(
        "\n {} {} <command> [subcommand] [options]\n",
        style("Usage:").bold(),
        style("mybulker").green()
    );
}

/// Flags accepted before or after any command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GlobalOptions {
    pub api_url: Option<String>,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

/// Removes global flags from `args`, leaving the command and its own flags.
pub(crate) fn split_global_flags(args: &[String]) -> (GlobalOptions, Vec<String>) {
    let mut options = GlobalOptions::default();
    let mut rest = Vec::with_capacity(args.len());
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--api-url" if i + 1 < args.len() => {
                options.api_url = Some(args[i + 1].clone());
                i += 2;
            }
            "--log-file" if i + 1 < args.len() => {
                options.log_file = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--verbose" | "-v" => {
                options.verbose = true;
                i += 1;
            }
            _ => {
                rest.push(args[i].clone());
                i += 1;
            }
        }
    }
    (options, rest)
}

/// Everything a command needs besides its own arguments.
pub(crate) struct CliContext {
    pub config: ClientConfig,
    pub data_dir: PathBuf,
}

impl CliContext {
    fn load(options: &GlobalOptions) -> Result<Self> {
        let data_dir = NativePlatform::data_dir();
        let mut config = ClientConfig::load(&data_dir)?;
        config.apply_env();
        if let Some(url) = &options.api_url {
            config.api_url = url.clone();
        }
        Ok(Self { config, data_dir })
    }

    pub fn client(&self) -> Result<ApiClient> {
        Ok(ApiClient::new(
            &self.config.api_url,
            self.config.request_timeout(),
        )?)
    }

    pub fn template_store(&self) -> Result<SqliteTemplateStore> {
        SqliteTemplateStore::open(&self.data_dir.join(TEMPLATE_DB))
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            interval: self.config.poll_interval(),
            max_consecutive_failures: self.config.max_poll_failures,
            ..WatchOptions::default()
        }
    }
}

/// Turns the server's not-found answer into a plain message.
pub(crate) fn not_found_as(err: ApiError, what: &str, id: u64) -> anyhow::Error {
    if err.is_not_found() {
        anyhow!("{} #{} does not exist", what, id)
    } else {
        err.into()
    }
}

pub async fn run_main() -> Result<()> {
    let raw: Vec<String> = std::env::args().collect();
    let (options, args) = split_global_flags(&raw);

    let ctx = CliContext::load(&options)?;
    crate::logging::init(
        crate::logging::resolve_level(&ctx.config.log_level, options.verbose),
        options.log_file.as_deref(),
    )?;

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    match cmd {
        "tasks" | "task" => tasks::run_tasks_command(&ctx, &args).await,
        "results" | "result" => results::run_results_command(&ctx, &args).await,
        "instances" | "instance" => instances::run_instances_command(&ctx, &args).await,
        "dashboard" | "stats" => instances::show_dashboard(&ctx).await,
        "templates" | "template" => templates::run_templates_command(&ctx, &args).await,
        "sql" => server::run_sql_command(&ctx, &args).await,
        "databases" | "dbs" => server::run_databases_command(&ctx, &args).await,
        "settings" => server::run_settings_command(&ctx, &args).await,
        "config" => config_cmd::run_config_command(&ctx, &args),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{GlobalOptions, split_global_flags};

    #[test]
    fn global_flags_are_accepted_anywhere() {
        let args = vec![
            "mybulker".to_string(),
            "--api-url".to_string(),
            "http://10.0.0.5:9092".to_string(),
            "tasks".to_string(),
            "show".to_string(),
            "7".to_string(),
            "-v".to_string(),
        ];
        let (options, rest) = split_global_flags(&args);
        assert_eq!(
            options,
            GlobalOptions {
                api_url: Some("http://10.0.0.5:9092".to_string()),
                verbose: true,
                log_file: None,
            }
        );
        assert_eq!(rest, vec!["mybulker", "tasks", "show", "7"]);
    }

    #[test]
    fn log_file_flag_takes_a_path() {
        let args = vec![
            "mybulker".to_string(),
            "config".to_string(),
            "show".to_string(),
            "--log-file".to_string(),
            "/tmp/mybulker.log".to_string(),
        ];
        let (options, rest) = split_global_flags(&args);
        assert_eq!(options.log_file, Some(PathBuf::from("/tmp/mybulker.log")));
        assert_eq!(rest.len(), 3);
    }
}
