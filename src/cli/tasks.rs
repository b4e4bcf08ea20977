use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use console::style;
use tokio::task::JoinSet;
use tracing::debug;

use super::{CliContext, not_found_as};
use super::args::{
    has_flag, parse_db_refs, parse_id, parse_id_list, parse_positional_args, parse_repeated_flag,
    parse_sort, parse_string_flag, parse_u32_flag,
};
use super::render;
use crate::core::api::ApiClient;
use crate::core::batch;
use crate::core::task::aggregate;
use crate::core::task::create::{CreateTaskRequest, DatabaseMode, ValidationErrors};
use crate::core::task::model::{TaskDatabase, TaskListQuery};
use crate::core::task::status::Status;
use crate::core::templates::{QueryTaskTemplate, TemplateStore, TemplateValues};
use crate::core::terminal::{
    GuideSection, print_error, print_info, print_success, print_warn, styled_status,
};
use crate::core::watch::{StopReason, TaskSnapshot, TaskWatcher, WatchEvent, WatchOptions};

pub async fn run_tasks_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };
    match sub_cmd {
        "list" | "ls" => list_tasks(ctx, args).await,
        "show" | "get" => {
            let id = single_id(args, "tasks show <task_id>")?;
            let client = ctx.client()?;
            show_task(&client, id, !has_flag(args, 3, &["--brief"])).await
        }
        "create" | "new" => create_task(ctx, args).await,
        "run" | "rerun" => run_tasks(ctx, args).await,
        "watch" => {
            let id = single_id(args, "tasks watch <task_id>")?;
            let mut options = ctx.watch_options();
            if let Some(ms) = parse_u32_flag(args, 3, "--interval")? {
                options.interval = std::time::Duration::from_millis(u64::from(ms.max(100)));
            }
            watch_task(Arc::new(ctx.client()?), id, options).await
        }
        "errors" | "failures" => show_errors(ctx, args).await,
        "stats" => show_stats(ctx, args).await,
        "favorite" | "fav" => toggle_favorite(ctx, args).await,
        "delete" | "rm" => delete_tasks(ctx, args).await,
        _ => {
            GuideSection::new("mybulker tasks")
                .command("list", "--name <text> --status <status> --favorite --page <n>")
                .command("show <id>", "Task summary, statements and execution matrix (--brief)")
                .command("create", "--name --instances --mode --db --sql|--sql-file")
                .command("run <id>...", "Start tasks; --watch follows them to the end")
                .command("watch <id>", "Poll a running task (--interval <ms>)")
                .command("errors <id>", "Failed executions with their error messages")
                .command("stats <id>", "Server-side execution statistics")
                .command("favorite <id>", "Toggle the favorite flag")
                .command("delete <id>...", "Delete tasks (--yes)")
                .blank()
                .hint(
                    "mybulker tasks create --name nightly --instances 1 --db 1:orders --sql 'SELECT 1;'",
                    "",
                )
                .hint("mybulker tasks run 12 --watch", "")
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
    parse_id(raw, "task id")
}

pub(crate) fn list_query_from_flags(
    args: &[String],
    start: usize,
    default_page_size: u32,
) -> Result<TaskListQuery> {
    let status = match parse_string_flag(args, start, "--status") {
        Some(raw) => Some(
            Status::from_name(&raw)
                .ok_or_else(|| anyhow!("unknown status '{}'", raw))?,
        ),
        None => None,
    };
    let sort = match parse_string_flag(args, start, "--sort") {
        Some(raw) => Some(parse_sort(&raw)?),
        None => None,
    };
    Ok(TaskListQuery {
        task_name: parse_string_flag(args, start, "--name"),
        status,
        is_favorite: has_flag(args, start, &["--favorite"]).then_some(true),
        page: parse_u32_flag(args, start, "--page")?.unwrap_or(1).max(1),
        page_size: parse_u32_flag(args, start, "--page-size")?
            .unwrap_or(default_page_size)
            .max(1),
        sort,
    })
}

async fn list_tasks(ctx: &CliContext, args: &[String]) -> Result<()> {
    let query = list_query_from_flags(args, 3, ctx.config.page_size)?;
    let page = ctx.client()?.list_tasks(&query).await?;
    render::task_list(&page, query.page, query.page_size);
    Ok(())
}

pub(crate) async fn show_task(client: &ApiClient, task_id: u64, with_matrix: bool) -> Result<()> {
    let (task, sqls, matrix) = tokio::try_join!(
        client.get_task(task_id),
        client.task_sqls(task_id),
        client.sql_executions(task_id)
    )
    .map_err(|e| not_found_as(e, "task", task_id))?;
    let progress = aggregate::summarize(&task, &matrix);
    render::task_summary(&task, &progress);
    render::target_table(&task, &aggregate::per_database(&matrix));
    render::statement_table(&sqls, &progress);
    if with_matrix {
        render::execution_matrix(&matrix);
    }
    if progress.cells.failed > 0 {
        GuideSection::new("Next")
            .hint(
                &format!("mybulker tasks errors {}", task_id),
                "show every failed execution",
            )
            .print();
    }
    println!();
    Ok(())
}

/// Creation values given on the command line. Unset flags stay `None` so a
/// template can supply them.
pub(crate) fn values_from_flags(args: &[String], start: usize) -> Result<TemplateValues> {
    let mut values = TemplateValues {
        task_name: parse_string_flag(args, start, "--name"),
        description: parse_string_flag(args, start, "--description"),
        ..TemplateValues::default()
    };
    if let Some(raw) = parse_string_flag(args, start, "--instances") {
        values.instance_ids = Some(parse_id_list(&[raw], "instance id")?);
    }
    if let Some(raw) = parse_string_flag(args, start, "--mode") {
        values.database_mode = Some(
            DatabaseMode::from_name(&raw)
                .ok_or_else(|| anyhow!("--mode must be include or exclude, got '{}'", raw))?,
        );
    }
    let dbs = parse_repeated_flag(args, start, "--db");
    if !dbs.is_empty() {
        values.selected_dbs = Some(parse_db_refs(&dbs)?);
    }
    values.sql_content = match (
        parse_string_flag(args, start, "--sql"),
        parse_string_flag(args, start, "--sql-file"),
    ) {
        (Some(_), Some(_)) => return Err(anyhow!("use either --sql or --sql-file, not both")),
        (Some(sql), None) => Some(sql),
        (None, Some(path)) => Some(
            std::fs::read_to_string(&path).with_context(|| format!("reading SQL from {}", path))?,
        ),
        (None, None) => None,
    };
    Ok(values)
}

/// Without `--instances`, the instances are the ones the chosen databases live on.
fn infer_instances(request: &mut CreateTaskRequest) {
    if !request.instance_ids.is_empty() {
        return;
    }
    for db in &request.selected_dbs {
        if !request.instance_ids.contains(&db.instance_id) {
            request.instance_ids.push(db.instance_id);
        }
    }
}

fn report_field_errors(errors: &ValidationErrors) -> anyhow::Error {
    debug!(fields = ?errors.fields(), "create request rejected locally");
    let mut section = GuideSection::new("Task not created");
    for error in &errors.0 {
        section = section.warn(&format!("{}: {}", error.field, error.message));
    }
    section.print();
    println!();
    anyhow!("{} invalid field(s)", errors.0.len())
}

/// The synced inventory of the chosen instances.
async fn known_databases(client: &ApiClient, instance_ids: &[u64]) -> Result<Vec<TaskDatabase>> {
    let mut known = Vec::new();
    for instance_id in instance_ids {
        let dbs = client.list_databases(*instance_id).await?;
        debug!(instance_id, count = dbs.len(), "known databases fetched");
        known.extend(dbs.iter().map(|db| db.as_target()));
    }
    Ok(known)
}

async fn create_task(ctx: &CliContext, args: &[String]) -> Result<()> {
    let mut values = TemplateValues::default();
    if let Some(name) = parse_string_flag(args, 3, "--template") {
        let store = ctx.template_store()?;
        let template = store
            .get(&name)
            .await?
            .ok_or_else(|| anyhow!("template '{}' not found", name))?;
        values = template.values;
    }
    values.overlay(values_from_flags(args, 3)?);

    let mut request = CreateTaskRequest::default();
    values.apply_to(&mut request);
    infer_instances(&mut request);

    if let Err(errors) = request.validate() {
        return Err(report_field_errors(&errors));
    }

    let client = ctx.client()?;
    let known = match request.database_mode {
        DatabaseMode::Exclude => known_databases(&client, &request.instance_ids).await?,
        DatabaseMode::Include => Vec::new(),
    };
    let plan = request.plan(&known);

    if has_flag(args, 3, &["--dry-run"]) {
        render::plan(&request, &plan);
        println!();
        return Ok(());
    }
    if plan.targets.is_empty() {
        let message = match request.database_mode {
            DatabaseMode::Exclude => "excludes every database of the chosen instances",
            DatabaseMode::Include => "no database left on the chosen instances",
        };
        return Err(report_field_errors(&ValidationErrors::single(
            "selected_dbs",
            message,
        )));
    }

    if !has_flag(args, 3, &["--no-validate"]) {
        let check = client.validate_sql(&request.sql_content).await?;
        if !check.valid {
            let message = check.error.unwrap_or_else(|| "invalid SQL".to_string());
            return Err(report_field_errors(&ValidationErrors::single(
                "sql_content",
                message,
            )));
        }
    }

    let task = client.create_task(&request).await?;
    print_success(&format!(
        "Created task #{} ({} databases x {} statements)",
        task.id, task.total_dbs, task.total_sqls
    ));

    if let Some(name) = parse_string_flag(args, 3, "--save-template") {
        let store = ctx.template_store()?;
        store
            .upsert(&QueryTaskTemplate::new(
                name.clone(),
                TemplateValues::from_request(&request),
            ))
            .await?;
        print_info(&format!("Saved template '{}'", name));
    }

    if has_flag(args, 3, &["--run"]) {
        let client = Arc::new(client);
        start_task(&client, task.id).await?;
        if has_flag(args, 3, &["--watch"]) {
            let options = WatchOptions {
                after_rerun: true,
                ..ctx.watch_options()
            };
            return watch_task(client, task.id, options).await;
        }
        return Ok(());
    }
    show_task(&client, task.id, false).await
}

async fn start_task(client: &ApiClient, task_id: u64) -> Result<()> {
    let task = client
        .get_task(task_id)
        .await
        .map_err(|e| not_found_as(e, "task", task_id))?;
    if !task.status.can_run() {
        return Err(anyhow!(
            "task #{} is {}, it cannot be run now",
            task_id,
            task.status
        ));
    }
    let message = client.run_task(task_id).await?;
    print_success(&format!("Task #{} started: {}", task_id, message));
    Ok(())
}

async fn run_tasks(ctx: &CliContext, args: &[String]) -> Result<()> {
    let ids = parse_id_list(&parse_positional_args(args, 3), "task id")?;
    if ids.is_empty() {
        return Err(anyhow!("Usage: mybulker tasks run <task_id>... [--watch]"));
    }
    let watch = has_flag(args, 3, &["--watch"]);
    let client = Arc::new(ctx.client()?);

    if ids.len() == 1 {
        start_task(&client, ids[0]).await?;
        if watch {
            let options = WatchOptions {
                after_rerun: true,
                ..ctx.watch_options()
            };
            return watch_task(client, ids[0], options).await;
        }
        return Ok(());
    }

    let report = batch::run_tasks(client.clone(), &ids).await;
    for id in &report.succeeded {
        print_success(&format!("Task #{} started", id));
    }
    for (id, message) in &report.failed {
        print_error(&format!("Task #{}: {}", id, message));
    }
    if watch && !report.succeeded.is_empty() {
        watch_many(ctx, client, &report.succeeded).await?;
    }
    if !report.all_succeeded() {
        return Err(anyhow!(
            "{} of {} tasks could not be started",
            report.failed.len(),
            report.total()
        ));
    }
    Ok(())
}

/// Follows one task until the watcher stops, printing a line per poll.
async fn watch_task(client: Arc<ApiClient>, task_id: u64, options: WatchOptions) -> Result<()> {
    let (mut watcher, mut events) = TaskWatcher::spawn(client, task_id, options);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last: Option<TaskSnapshot> = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(WatchEvent::Update(snapshot)) => {
                    println!("{}", render::watch_line(&snapshot.task, &snapshot.progress, snapshot.poll));
                    last = Some(*snapshot);
                }
                Some(WatchEvent::PollFailed { attempt, message }) => {
                    print_warn(&format!("poll failed ({}): {}", attempt, message));
                }
                Some(WatchEvent::Regression { from, to }) => {
                    print_warn(&format!("server reported {} after {}, ignoring it", to, from));
                }
                Some(WatchEvent::CellRegression { execution_id, from, to }) => {
                    debug!(execution_id, %from, %to, "cell status went backwards");
                }
                Some(WatchEvent::StructureChanged { cells_before, cells_after }) => {
                    print_warn(&format!(
                        "execution matrix changed from {} to {} cells",
                        cells_before, cells_after
                    ));
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                watcher.cancel();
                break;
            }
        }
    }

    let reason = watcher.finished().await;
    if let Some(snapshot) = &last
        && !matches!(reason, StopReason::Cancelled)
    {
        render::task_summary(&snapshot.task, &snapshot.progress);
        println!();
    }
    match reason {
        StopReason::Terminal(Status::Completed) => {
            let failed = last.as_ref().map(|s| s.task.failed_dbs).unwrap_or(0);
            if failed > 0 {
                print_warn(&format!(
                    "Task #{} completed with {} failed database(s). See 'mybulker tasks errors {}'.",
                    task_id, failed, task_id
                ));
            } else {
                print_success(&format!("Task #{} completed", task_id));
            }
            Ok(())
        }
        StopReason::Terminal(status) => Err(anyhow!("task #{} finished as {}", task_id, status)),
        StopReason::NotRunning(status) => {
            print_info(&format!("Task #{} is {}, nothing to watch", task_id, status));
            Ok(())
        }
        StopReason::Cancelled => {
            print_warn("Stopped watching. The task keeps running on the server.");
            Ok(())
        }
        StopReason::TooManyErrors => Err(anyhow!(
            "giving up on task #{} after repeated poll failures",
            task_id
        )),
    }
}

/// Follows several freshly started tasks at once, reporting each as it settles.
async fn watch_many(ctx: &CliContext, client: Arc<ApiClient>, task_ids: &[u64]) -> Result<()> {
    let mut set = JoinSet::new();
    for &task_id in task_ids {
        let options = WatchOptions {
            after_rerun: true,
            include_executions: false,
            ..ctx.watch_options()
        };
        let (watcher, mut events) = TaskWatcher::spawn(client.clone(), task_id, options);
        set.spawn(async move {
            let task_id = watcher.task_id();
            let mut last_status = None;
            while let Some(event) = events.recv().await {
                if let WatchEvent::Update(snapshot) = event {
                    last_status = Some(snapshot.task.status);
                }
            }
            (task_id, watcher.finished().await, last_status)
        });
    }

    let mut unfinished = 0;
    while let Some(joined) = set.join_next().await {
        let (task_id, reason, last_status) = joined?;
        match reason {
            StopReason::Terminal(Status::Completed) => {
                print_success(&format!("Task #{} completed", task_id))
            }
            StopReason::Terminal(status) | StopReason::NotRunning(status) => {
                print_warn(&format!("Task #{} ended as {}", task_id, status));
                unfinished += 1;
            }
            StopReason::Cancelled | StopReason::TooManyErrors => {
                let seen = last_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                print_warn(&format!("Lost track of task #{} (last seen {})", task_id, seen));
                unfinished += 1;
            }
        }
    }
    if unfinished > 0 {
        return Err(anyhow!("{} task(s) did not complete", unfinished));
    }
    Ok(())
}

async fn show_errors(ctx: &CliContext, args: &[String]) -> Result<()> {
    let id = single_id(args, "tasks errors <task_id>")?;
    let matrix = ctx.client()?.sql_executions(id).await?;
    let failed = aggregate::failed_cells(&matrix);
    if failed.is_empty() {
        print_success(&format!("Task #{} has no failed executions", id));
        return Ok(());
    }
    render::failed_cells(&failed);
    println!("\n{} failed execution(s)", failed.len());
    Ok(())
}

async fn show_stats(ctx: &CliContext, args: &[String]) -> Result<()> {
    let id = single_id(args, "tasks stats <task_id>")?;
    let client = ctx.client()?;
    let (task, matrix, stats) = tokio::try_join!(
        client.get_task(id),
        client.sql_executions(id),
        client.execution_stats(id)
    )?;
    println!(
        "{} #{}  {}  {}",
        style("Task").bold(),
        task.id,
        task.task_name,
        styled_status(task.status)
    );
    render::execution_stats(
        &stats,
        &aggregate::database_progress(&matrix),
        &aggregate::sql_level_progress(&matrix),
    );
    Ok(())
}

async fn toggle_favorite(ctx: &CliContext, args: &[String]) -> Result<()> {
    let id = single_id(args, "tasks favorite <task_id>")?;
    let client = ctx.client()?;
    client.toggle_favorite(id).await?;
    let task = client.get_task(id).await?;
    if task.is_favorite {
        print_success(&format!("Task #{} added to favorites", id));
    } else {
        print_success(&format!("Task #{} removed from favorites", id));
    }
    Ok(())
}

async fn delete_tasks(ctx: &CliContext, args: &[String]) -> Result<()> {
    let mut ids = parse_id_list(&parse_positional_args(args, 3), "task id")?;
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(*id));
    if ids.is_empty() {
        return Err(anyhow!("Usage: mybulker tasks delete <task_id>... [--yes]"));
    }
    if !has_flag(args, 3, &["--yes", "-y"]) {
        let listed = ids
            .iter()
            .map(|id| format!("#{}", id))
            .collect::<Vec<_>>()
            .join(", ");
        let confirmed = inquire::Confirm::new(&format!("Delete {}? This cannot be undone.", listed))
            .with_default(false)
            .prompt()?;
        if !confirmed {
            print_info("Nothing deleted.");
            return Ok(());
        }
    }
    let message = ctx.client()?.delete_tasks(&ids).await?;
    print_success(&format!("Deleted {} task(s): {}", ids.len(), message));
    Ok(())
}
