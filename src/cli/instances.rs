use anyhow::{Context, Result, anyhow};
use tracing::debug;

use super::args::{
    has_flag, parse_id, parse_id_list, parse_param, parse_port_flag, parse_positional_args,
    parse_repeated_flag, parse_string_flag, parse_u32_flag,
};
use super::{CliContext, not_found_as, render};
use crate::core::api::ApiClient;
use crate::core::instance::{InstanceDraft, InstanceListQuery};
use crate::core::task::create::ValidationErrors;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

const DEFAULT_PORT: u16 = 3306;
/// Largest page `/api/instances` serves.
const INSTANCE_PAGE_SIZE: u32 = 100;

pub async fn run_instances_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };
    match sub_cmd {
        "list" | "ls" => list_instances(ctx, args).await,
        "show" | "get" => show_instance(ctx, args).await,
        "add" | "create" => add_instance(ctx, args).await,
        "update" | "edit" => update_instance(ctx, args).await,
        "delete" | "rm" => delete_instance(ctx, args).await,
        "test" => test_connection(ctx, args).await,
        "sync" => sync_databases(ctx, args).await,
        "export" => export_instances(ctx, args).await,
        _ => {
            GuideSection::new("mybulker instances")
                .command("list", "--name <text> --host <text> --page <n>")
                .command("show <id>", "Settings and synced databases of an instance")
                .command("add", "--name --host [--port 3306] --user [--password] [--param k=v]")
                .command("update <id>", "Same flags as add; unset flags keep their value")
                .command("delete <id>", "Remove an instance (--yes)")
                .command("test [<id>]", "Connect with a stored instance or with --host/--user flags")
                .command("sync <id>...", "Re-read database lists from the servers (--all)")
                .command("export [<id>...]", "Instance records as JSON (--out <file>)")
                .blank()
                .hint(
                    "mybulker instances add --name prod-eu --host 10.0.0.5 --user report",
                    "prompts for the password",
                )
                .hint("mybulker instances sync --all", "")
                .print();
            println!();
            Ok(())
        }
    }
}

fn single_id(args: &[String], usage: &str) -> Result<u64> {
    let positional = parse_positional_args(args, 3);
    let raw = positional
        .first()
        .ok_or_else(|| anyhow!("Usage: mybulker {}", usage))?;
    parse_id(raw, "instance id")
}

fn report_field_errors(errors: &ValidationErrors) -> anyhow::Error {
    debug!(fields = ?errors.fields(), "instance settings rejected locally");
    let mut section = GuideSection::new("Instance not saved");
    for error in &errors.0 {
        section = section.warn(&format!("{}: {}", error.field, error.message));
    }
    section.print();
    println!();
    anyhow!("{} invalid field(s)", errors.0.len())
}

/// Lays the given flags over `draft`; flags that are absent leave it alone.
pub(crate) fn overlay_flags(draft: &mut InstanceDraft, args: &[String], start: usize) -> Result<()> {
    if let Some(name) = parse_string_flag(args, start, "--name") {
        draft.name = name.trim().to_string();
    }
    if let Some(host) = parse_string_flag(args, start, "--host") {
        draft.host = host.trim().to_string();
    }
    if let Some(port) = parse_port_flag(args, start)? {
        draft.port = port;
    }
    if let Some(user) = parse_string_flag(args, start, "--user") {
        draft.username = user.trim().to_string();
    }
    if let Some(password) = parse_string_flag(args, start, "--password") {
        draft.password = password;
    }
    if let Some(remark) = parse_string_flag(args, start, "--remark") {
        draft.remark = remark;
    }
    let params = parse_repeated_flag(args, start, "--param")
        .iter()
        .map(|raw| parse_param(raw))
        .collect::<Result<Vec<_>>>()?;
    draft.set_params(&params);
    Ok(())
}

fn prompt_password(draft: &mut InstanceDraft) -> Result<()> {
    if draft.password.is_empty() && !draft.username.is_empty() {
        draft.password = inquire::Password::new(&format!("Password for {}:", draft.username))
            .without_confirmation()
            .prompt()?;
    }
    Ok(())
}

async fn list_instances(ctx: &CliContext, args: &[String]) -> Result<()> {
    let query = InstanceListQuery {
        name: parse_string_flag(args, 3, "--name"),
        host: parse_string_flag(args, 3, "--host"),
        page: parse_u32_flag(args, 3, "--page")?.unwrap_or(1).max(1),
        page_size: parse_u32_flag(args, 3, "--page-size")?
            .unwrap_or(ctx.config.page_size)
            .max(1),
    };
    let page = ctx.client()?.list_instances(&query).await?;
    render::instance_list(&page, query.page, query.page_size);
    Ok(())
}

async fn show_instance(ctx: &CliContext, args: &[String]) -> Result<()> {
    let id = single_id(args, "instances show <instance_id>")?;
    let client = ctx.client()?;
    let instance = client
        .get_instance(id)
        .await
        .map_err(|e| not_found_as(e, "instance", id))?;
    let dbs = client.list_databases(id).await?;
    render::instance_detail(&instance, &dbs);
    Ok(())
}

async fn add_instance(ctx: &CliContext, args: &[String]) -> Result<()> {
    let mut draft = InstanceDraft {
        port: DEFAULT_PORT,
        ..InstanceDraft::default()
    };
    overlay_flags(&mut draft, args, 3)?;
    prompt_password(&mut draft)?;
    if let Err(errors) = draft.validate() {
        return Err(report_field_errors(&errors));
    }
    let instance = ctx.client()?.create_instance(&draft).await?;
    print_success(&format!(
        "Registered instance #{} {} ({}, MySQL {})",
        instance.id,
        instance.name,
        instance.address(),
        instance.version
    ));
    print_info(&format!(
        "Databases are synced in the background. Check with 'mybulker instances show {}'.",
        instance.id
    ));
    Ok(())
}

async fn update_instance(ctx: &CliContext, args: &[String]) -> Result<()> {
    let id = single_id(args, "instances update <instance_id> [flags]")?;
    let client = ctx.client()?;
    let current = client
        .get_instance(id)
        .await
        .map_err(|e| not_found_as(e, "instance", id))?;
    let mut draft = current.to_draft();
    overlay_flags(&mut draft, args, 3)?;
    if draft == current.to_draft() {
        print_info("Nothing to change.");
        return Ok(());
    }
    if let Err(errors) = draft.validate() {
        return Err(report_field_errors(&errors));
    }
    let updated = client.update_instance(id, &draft).await?;
    print_success(&format!(
        "Updated instance #{} {} ({})",
        updated.id,
        updated.name,
        updated.address()
    ));
    Ok(())
}

async fn delete_instance(ctx: &CliContext, args: &[String]) -> Result<()> {
    let id = single_id(args, "instances delete <instance_id> [--yes]")?;
    let client = ctx.client()?;
    let instance = client
        .get_instance(id)
        .await
        .map_err(|e| not_found_as(e, "instance", id))?;
    if !has_flag(args, 3, &["--yes", "-y"]) {
        let confirmed = inquire::Confirm::new(&format!(
            "Delete instance #{} {} ({})? Tasks that target it will fail on rerun.",
            instance.id,
            instance.name,
            instance.address()
        ))
        .with_default(false)
        .prompt()?;
        if !confirmed {
            print_info("Nothing deleted.");
            return Ok(());
        }
    }
    client.delete_instance(id).await?;
    print_success(&format!("Deleted instance #{} {}", id, instance.name));
    Ok(())
}

async fn test_connection(ctx: &CliContext, args: &[String]) -> Result<()> {
    let client = ctx.client()?;
    let mut draft = match parse_positional_args(args, 3).first() {
        Some(raw) => {
            let id = parse_id(raw, "instance id")?;
            client
                .get_instance(id)
                .await
                .map_err(|e| not_found_as(e, "instance", id))?
                .to_draft()
        }
        None => InstanceDraft {
            port: DEFAULT_PORT,
            ..InstanceDraft::default()
        },
    };
    overlay_flags(&mut draft, args, 3)?;
    if draft.host.is_empty() {
        return Err(anyhow!(
            "Usage: mybulker instances test <instance_id> | --host <host> --user <user>"
        ));
    }
    prompt_password(&mut draft)?;
    let target = format!("{}@{}:{}", draft.username, draft.host, draft.port);
    match client.test_connection(&draft).await {
        Ok(_) => {
            print_success(&format!("Connected to {}", target));
            Ok(())
        }
        Err(err) => {
            print_error(&format!("Cannot connect to {}: {}", target, err));
            Err(anyhow!("connection test failed"))
        }
    }
}

/// Every registered instance id, following pagination.
async fn all_instance_ids(client: &ApiClient) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    let mut query = InstanceListQuery {
        page_size: INSTANCE_PAGE_SIZE,
        ..InstanceListQuery::default()
    };
    loop {
        let page = client.list_instances(&query).await?;
        let received = page.items.len();
        ids.extend(page.items.iter().map(|i| i.id));
        if received == 0 || ids.len() as u64 >= page.total {
            break;
        }
        query.page += 1;
    }
    Ok(ids)
}

async fn sync_databases(ctx: &CliContext, args: &[String]) -> Result<()> {
    let client = ctx.client()?;
    let ids = if has_flag(args, 3, &["--all"]) {
        all_instance_ids(&client).await?
    } else {
        parse_id_list(&parse_positional_args(args, 3), "instance id")?
    };
    if ids.is_empty() {
        return Err(anyhow!("Usage: mybulker instances sync <instance_id>... | --all"));
    }
    let message = client.sync_databases(&ids).await?;
    print_success(&format!("Synced {} instance(s): {}", ids.len(), message));
    for id in &ids {
        let count = client.list_databases(*id).await?.len();
        println!("  #{}  {} database(s)", id, count);
    }
    Ok(())
}

async fn export_instances(ctx: &CliContext, args: &[String]) -> Result<()> {
    let ids = parse_id_list(&parse_positional_args(args, 3), "instance id")?;
    let instances = ctx.client()?.export_instances(&ids).await?;
    let json = serde_json::to_string_pretty(&instances)?;
    match parse_string_flag(args, 3, "--out") {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path))?;
            print_success(&format!(
                "Exported {} instance(s) to {}. The file holds passwords in clear text.",
                instances.len(),
                path
            ));
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub async fn show_dashboard(ctx: &CliContext) -> Result<()> {
    let stats = ctx.client()?.dashboard_stats().await?;
    render::dashboard(&stats);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::overlay_flags;
    use crate::core::instance::InstanceDraft;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("mybulker")
            .chain(parts.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn absent_flags_keep_current_settings() {
        let mut draft = InstanceDraft {
            name: "prod-eu".to_string(),
            host: "10.0.0.5".to_string(),
            port: 3306,
            username: "report".to_string(),
            password: "s3cret".to_string(),
            ..InstanceDraft::default()
        };
        let args = argv(&[
            "instances", "update", "3", "--port", "3307", "--param", "charset=utf8mb4",
        ]);
        overlay_flags(&mut draft, &args, 3).unwrap();
        assert_eq!(draft.port, 3307);
        assert_eq!(draft.host, "10.0.0.5");
        assert_eq!(draft.password, "s3cret");
        assert_eq!(draft.params[0]["charset"], "utf8mb4");
    }

    #[test]
    fn bad_param_is_an_error() {
        let mut draft = InstanceDraft::default();
        let args = argv(&["instances", "add", "--param", "charset"]);
        assert!(overlay_flags(&mut draft, &args, 3).is_err());
    }
}
