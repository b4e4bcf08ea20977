use anyhow::{Context, Result, anyhow};

use super::CliContext;
use super::args::{parse_id, parse_positional_args, parse_string_flag};
use crate::core::task::sql_split::split_statements;
use crate::core::terminal::{GuideSection, Table, print_error, print_success};

/// Execution settings the backend accepts through `/api/configs`.
const SETTING_KEYS: &[&str] = &["max_conn", "concurrency", "query_timeout_sec"];

/// SQL from `--sql`, `--sql-file` or the first positional argument.
fn sql_from_args(args: &[String]) -> Result<String> {
    if let Some(sql) = parse_string_flag(args, 3, "--sql") {
        return Ok(sql);
    }
    if let Some(path) = parse_string_flag(args, 3, "--sql-file") {
        return std::fs::read_to_string(&path).with_context(|| format!("reading SQL from {}", path));
    }
    parse_positional_args(args, 3)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("pass SQL as an argument, with --sql or with --sql-file"))
}

pub async fn run_sql_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };
    match sub_cmd {
        "validate" | "check" => {
            let sql = sql_from_args(args)?;
            let result = ctx.client()?.validate_sql(&sql).await?;
            if result.valid {
                print_success("SQL is valid");
                Ok(())
            } else {
                let message = result.error.unwrap_or_else(|| "invalid SQL".to_string());
                print_error(&message);
                Err(anyhow!("SQL rejected by the server"))
            }
        }
        "split" => {
            let sql = sql_from_args(args)?;
            let statements = split_statements(&sql);
            if statements.is_empty() {
                return Err(anyhow!("no statements found"));
            }
            for (index, statement) in statements.iter().enumerate() {
                println!("-- statement {}\n{};\n", index + 1, statement);
            }
            Ok(())
        }
        _ => {
            GuideSection::new("mybulker sql")
                .command("validate", "Ask the server whether SQL parses")
                .command("split", "Show the statements a task would run")
                .blank()
                .hint("mybulker sql validate 'SELECT * FROM orders'", "")
                .hint("mybulker sql split --sql-file report.sql", "")
                .print();
            println!();
            Ok(())
        }
    }
}

pub async fn run_databases_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let raw = parse_string_flag(args, 2, "--instance")
        .or_else(|| parse_positional_args(args, 2).into_iter().next())
        .ok_or_else(|| anyhow!("Usage: mybulker databases --instance <instance_id>"))?;
    let instance_id = parse_id(&raw, "instance id")?;
    let dbs = ctx.client()?.list_databases(instance_id).await?;
    if dbs.is_empty() {
        println!("No synced databases for instance {}.", instance_id);
        return Ok(());
    }
    let mut table = Table::new(["ID", "NAME", "INSTANCE", "TARGET"]);
    for db in &dbs {
        let target = db.as_target();
        table.row(vec![
            db.id.to_string(),
            db.name.clone(),
            target.label(),
            format!("{}:{}", target.instance_id, target.database_name),
        ]);
    }
    table.print();
    println!("\n{} database(s)", dbs.len());
    Ok(())
}

pub async fn run_settings_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };
    let positional = parse_positional_args(args, 3);
    match sub_cmd {
        "get" => {
            let client = ctx.client()?;
            let keys: Vec<String> = if positional.is_empty() {
                SETTING_KEYS.iter().map(|k| k.to_string()).collect()
            } else {
                positional
            };
            let mut section = GuideSection::new("Execution settings");
            for key in keys {
                let entry = client.get_config(&key).await?;
                section = section.status(&entry.c_key, &entry.c_value);
            }
            section.print();
            println!();
            Ok(())
        }
        "set" => {
            let [key, value, ..] = positional.as_slice() else {
                return Err(anyhow!("Usage: mybulker settings set <key> <value>"));
            };
            if !SETTING_KEYS.contains(&key.as_str()) {
                return Err(anyhow!(
                    "unknown setting '{}'; expected one of {}",
                    key,
                    SETTING_KEYS.join(", ")
                ));
            }
            if value.trim().parse::<u64>().is_err() {
                return Err(anyhow!("setting '{}' expects a whole number", key));
            }
            let message = ctx.client()?.set_config(key, value.trim()).await?;
            print_success(&format!("{} = {} ({})", key, value.trim(), message));
            Ok(())
        }
        _ => {
            GuideSection::new("mybulker settings")
                .command("get [key]...", "Read execution settings")
                .command("set <key> <value>", "Change an execution setting")
                .blank()
                .text(&format!("Keys: {}", SETTING_KEYS.join(", ")))
                .print();
            println!();
            Ok(())
        }
    }
}
