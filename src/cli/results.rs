use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use console::style;

use super::CliContext;
use super::args::{
    has_flag, parse_filter, parse_id, parse_positional_args, parse_repeated_flag, parse_sort,
    parse_string_flag, parse_u32_flag,
};
use crate::core::task::results::{ResultQuery, export_file_name};
use crate::core::task::schema::visible_columns;
use crate::core::terminal::{GuideSection, Table, print_info, print_success, truncate};

pub async fn run_results_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };
    match sub_cmd {
        "show" | "get" => show_results(ctx, args).await,
        "export" => export_results(ctx, args).await,
        _ => {
            GuideSection::new("mybulker results")
                .command("show <task> <sql>", "One page of a statement's merged results")
                .command("export <task> <sql>", "Save the server's CSV (--out <file>, --url-only)")
                .blank()
                .text("--page <n>  --page-size <n>  --sort <col>[:asc|:desc]")
                .text("--filter <col>=<value> (repeatable)  --instance <id>  --database <name>")
                .blank()
                .hint("mybulker results show 12 40 --filter city=Berlin --sort amount:desc", "")
                .print();
            println!();
            Ok(())
        }
    }
}

fn task_and_sql(args: &[String], usage: &str) -> Result<(u64, u64)> {
    let positional = parse_positional_args(args, 3);
    match positional.as_slice() {
        [task, sql, ..] => Ok((parse_id(task, "task id")?, parse_id(sql, "sql id")?)),
        _ => Err(anyhow!("Usage: mybulker {}", usage)),
    }
}

pub(crate) fn result_query_from_flags(
    args: &[String],
    start: usize,
    default_page_size: u32,
) -> Result<ResultQuery> {
    let page = parse_u32_flag(args, start, "--page")?.unwrap_or(1);
    let page_size = parse_u32_flag(args, start, "--page-size")?.unwrap_or(default_page_size);
    let mut query = ResultQuery::new(page, page_size);
    for raw in parse_repeated_flag(args, start, "--filter") {
        let (column, value) = parse_filter(&raw)?;
        query = query.with_filter(column, value);
    }
    if let Some(raw) = parse_string_flag(args, start, "--sort") {
        let (column, direction) = parse_sort(&raw)?;
        query = query.sorted_by(column, direction);
    }
    let instance_id = match parse_string_flag(args, start, "--instance") {
        Some(raw) => Some(parse_id(&raw, "instance id")?),
        None => None,
    };
    Ok(query.scoped_to(instance_id, parse_string_flag(args, start, "--database")))
}

async fn show_results(ctx: &CliContext, args: &[String]) -> Result<()> {
    let (task_id, sql_id) = task_and_sql(args, "results show <task_id> <sql_id>")?;
    let query = result_query_from_flags(args, 3, ctx.config.page_size)?;
    let client = ctx.client()?;
    let (sqls, page) = tokio::try_join!(client.task_sqls(task_id), client.sql_results(sql_id, &query))?;
    let sql = sqls
        .iter()
        .find(|sql| sql.id == sql_id)
        .ok_or_else(|| anyhow!("task #{} has no statement with id {}", task_id, sql_id))?;

    if has_flag(args, 3, &["--json"]) {
        println!("{}", serde_json::to_string_pretty(&page.items)?);
        return Ok(());
    }

    // the page's own schema wins; the statement's stored schema is the fallback
    let schema = page
        .schema
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&sql.result_table_schema);
    let columns = visible_columns(schema);

    println!(
        "{} {}\n",
        style(format!("SQL #{}", sql.sql_order)).bold(),
        style(truncate(&sql.sql_content, 80)).dim()
    );
    if columns.is_empty() {
        print_info("No result columns available for this statement (try --json).");
    } else if page.items.is_empty() {
        println!("No rows.");
    } else {
        let mut table = Table::new(columns.iter().map(|c| c.title.clone()));
        for row in &page.items {
            table.row(columns.iter().map(|c| truncate(&c.cell(row), 40)).collect());
        }
        table.print();
    }

    let pages = page.total.div_ceil(u64::from(query.page_size)).max(1);
    println!(
        "\n{}",
        style(format!(
            "page {} of {} ({} rows)",
            query.page, pages, page.total
        ))
        .dim()
    );
    Ok(())
}

async fn export_results(ctx: &CliContext, args: &[String]) -> Result<()> {
    let (task_id, sql_id) = task_and_sql(args, "results export <task_id> <sql_id>")?;
    let query = result_query_from_flags(args, 3, ctx.config.page_size)?;
    let client = ctx.client()?;

    if has_flag(args, 3, &["--url-only"]) {
        println!("{}", client.export_url(sql_id, &query)?);
        return Ok(());
    }

    let out = parse_string_flag(args, 3, "--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(export_file_name(task_id, sql_id)));
    let partial = out.with_extension("csv.part");
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;

    let written = match client.download_export(sql_id, &query, &mut file).await {
        Ok(written) => written,
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
    };
    drop(file);
    tokio::fs::rename(&partial, &out)
        .await
        .with_context(|| format!("moving export to {}", out.display()))?;
    print_success(&format!("Exported {} bytes to {}", written, out.display()));
    Ok(())
}
