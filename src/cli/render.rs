use console::style;

use crate::core::instance::{DashboardStats, Instance, RecentTask};
use crate::core::task::aggregate::{self, DatabaseSummary, FailedCell, Progress, TaskProgress};
use crate::core::task::create::{CreateTaskRequest, TaskPlan};
use crate::core::task::model::{
    DatabaseInfo, ExecutionStats, Page, QueryTask, QueryTaskSql, SqlExecutions,
};
use crate::core::task::status::Status;
use crate::core::terminal::{
    GuideSection, Table, print_warn, progress_bar, styled_outcome, styled_status, truncate,
};

const BAR_WIDTH: usize = 24;

pub(crate) fn task_list(page: &Page<QueryTask>, page_no: u32, page_size: u32) {
    if page.items.is_empty() {
        println!("No tasks found.");
        return;
    }
    let mut table = Table::new(["ID", "NAME", "STATUS", "DATABASES", "SQLS", "FAV", "CREATED"]);
    for task in &page.items {
        table.row(vec![
            task.id.to_string(),
            truncate(&task.task_name, 32),
            styled_status(task.status).to_string(),
            counter_cell(task.completed_dbs, task.failed_dbs, task.total_dbs),
            counter_cell(task.completed_sqls, task.failed_sqls, task.total_sqls),
            if task.is_favorite { "★" } else { "" }.to_string(),
            task.created_at.clone(),
        ]);
    }
    table.print();
    let pages = page.total.div_ceil(u64::from(page_size.max(1)));
    println!(
        "{}",
        style(format!(
            "page {} of {} ({} tasks)",
            page_no,
            pages.max(1),
            page.total
        ))
        .dim()
    );
}

fn counter_cell(completed: u32, failed: u32, total: u32) -> String {
    if failed > 0 {
        format!("{}/{} ({} failed)", completed, total, style(failed).red())
    } else {
        format!("{}/{}", completed, total)
    }
}

pub(crate) fn task_summary(task: &QueryTask, progress: &TaskProgress) {
    let mut section = GuideSection::new(&format!("Task #{}  {}", task.id, task.task_name))
        .status("Status", &styled_status(task.status).to_string())
        .status("Outcome", &styled_outcome(aggregate::outcome(task)).to_string())
        .status("Databases", &progress_bar(&progress.dbs, BAR_WIDTH))
        .status("Statements", &progress_bar(&progress.sqls, BAR_WIDTH));
    if progress.cells.total > 0 {
        section = section.status("Executions", &progress_bar(&progress.cells, BAR_WIDTH));
    }
    let (pending_dbs, pending_sqls) = (task.pending_dbs(), task.pending_sqls());
    if pending_dbs + pending_sqls > 0 {
        section = section.status(
            "Pending",
            &format!("{} database(s), {} statement(s)", pending_dbs, pending_sqls),
        );
    }
    if !task.description.is_empty() {
        section = section.status("Description", &task.description);
    }
    section = section
        .status("Favorite", if task.is_favorite { "yes" } else { "no" })
        .status("Created", &task.created_at);
    if let Some(started) = &task.started_at {
        section = section.status("Started", started);
    }
    if let Some(completed) = &task.completed_at {
        section = section.status("Finished", completed);
    }
    section.print();

    if let Err(violations) = task.check_invariants() {
        for violation in violations {
            print_warn(&format!("server reported inconsistent counters: {}", violation));
        }
    }
}

/// Statement list with per-statement progress. Uses the matrix when it is
/// available and the statement's own counters otherwise.
pub(crate) fn statement_table(sqls: &[QueryTaskSql], progress: &TaskProgress) {
    let mut ordered: Vec<&QueryTaskSql> = sqls.iter().collect();
    ordered.sort_by_key(|sql| sql.sql_order);

    let mut table = Table::new(["#", "SQL ID", "STATEMENT", "PROGRESS", "COLUMNS"]);
    for sql in ordered {
        let cells = progress
            .per_sql
            .iter()
            .find(|summary| summary.sql_id == sql.id)
            .map(|summary| summary.cells)
            .unwrap_or_else(|| {
                aggregate::Progress::new(sql.total_dbs, sql.completed_dbs, sql.failed_dbs)
            });
        table.row(vec![
            sql.sql_order.to_string(),
            sql.id.to_string(),
            truncate(&sql.sql_content, 48),
            progress_bar(&cells, 12),
            sql.columns().len().to_string(),
        ]);
    }
    if !table.is_empty() {
        println!();
        table.print();
    }
}

/// Target databases of a task with their cell progress across statements.
/// Targets the matrix does not mention yet show as pending.
pub(crate) fn target_table(task: &QueryTask, per_db: &[DatabaseSummary]) {
    let targets = task.target_databases();
    let mut table = Table::new(["DATABASE", "STATUS", "CELLS"]);
    for target in &targets {
        let (status, cells) = per_db
            .iter()
            .find(|db| db.key() == target.key())
            .map(|db| (db.status(), db.cells))
            .unwrap_or((Status::Pending, Progress::default()));
        table.row(vec![
            target.label(),
            styled_status(status).to_string(),
            progress_bar(&cells, 8),
        ]);
    }
    let unlisted = per_db
        .iter()
        .filter(|db| !targets.iter().any(|t| t.key() == db.key()));
    for db in unlisted {
        table.row(vec![
            db.target().label(),
            styled_status(db.status()).to_string(),
            progress_bar(&db.cells, 8),
        ]);
    }
    if !table.is_empty() {
        println!();
        table.print();
    }
}

/// Per-cell status for every statement, grouped by database.
pub(crate) fn execution_matrix(sqls: &[SqlExecutions]) {
    for sql in aggregate::ordered_sqls(sqls) {
        let groups = aggregate::group_by_database(sql);
        println!(
            "\n{} {}",
            style(format!("SQL #{}", sql.sql_order)).bold(),
            style(truncate(&sql.sql_content, 60)).dim()
        );
        if groups.is_empty() {
            println!("  no executions yet");
            continue;
        }
        let mut table = Table::new(["DATABASE", "INSTANCE", "STATUS", "ROWS", "TIME", "ERROR"]);
        for group in groups {
            for cell in group.cells {
                table.row(vec![
                    group.database_name.to_string(),
                    cell.instance_name.clone(),
                    styled_status(cell.status).to_string(),
                    cell.result_count.map(|n| n.to_string()).unwrap_or_default(),
                    cell.execution_time
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_default(),
                    cell.failure()
                        .map(|e| style(truncate(e, 48)).red().to_string())
                        .unwrap_or_default(),
                ]);
            }
        }
        for line in table.render().lines() {
            println!("  {}", line);
        }
    }
}

pub(crate) fn failed_cells(cells: &[FailedCell]) {
    let mut table = Table::new(["SQL", "EXECUTION", "INSTANCE", "DATABASE", "ERROR"]);
    for cell in cells {
        let instance = if cell.instance_name.is_empty() {
            format!("#{}", cell.instance_id)
        } else {
            cell.instance_name.clone()
        };
        table.row(vec![
            format!("#{}", cell.sql_order),
            cell.execution_id.to_string(),
            instance,
            cell.database_name.clone(),
            style(&cell.error_message).red().to_string(),
        ]);
    }
    table.print();
}

/// Server statistics next to the same partitions derived from the matrix.
pub(crate) fn execution_stats(stats: &ExecutionStats, local_dbs: &Progress, local_sqls: &Progress) {
    let mut table = Table::new(["", "TOTAL", "COMPLETED", "FAILED", "PENDING", "LOCAL"]);
    table.row(vec![
        "databases".to_string(),
        stats.db.total.to_string(),
        stats.db.completed.to_string(),
        stats.db.failed.to_string(),
        stats.db.pending.to_string(),
        progress_bar(local_dbs, 10),
    ]);
    table.row(vec![
        "statements".to_string(),
        stats.sql.total.to_string(),
        stats.sql.completed.to_string(),
        stats.sql.failed.to_string(),
        stats.sql.pending.to_string(),
        progress_bar(local_sqls, 10),
    ]);
    table.print();
}

pub(crate) fn plan(request: &CreateTaskRequest, plan: &TaskPlan) {
    let draft = plan.draft(request);
    let mut section = GuideSection::new(&format!("Plan  {}", draft.task_name))
        .status("Mode", request.database_mode.as_str())
        .status("Databases", &draft.total_dbs.to_string())
        .status("Statements", &draft.total_sqls.to_string())
        .status("Executions", &plan.cell_count().to_string())
        .blank();
    for target in &plan.targets {
        section = section.bullet(&target.label());
    }
    section = section.blank();
    for (index, statement) in plan.statements.iter().enumerate() {
        section = section.text(&format!("{}. {}", index + 1, truncate(statement, 72)));
    }
    section.print();
    if plan.targets.is_empty() {
        print_warn("No database would be targeted.");
    }
}

/// One line per poll while watching.
pub(crate) fn watch_line(task: &QueryTask, progress: &TaskProgress, poll: u32) -> String {
    let mut line = format!(
        "{} {}  dbs {}  sqls {}",
        style(format!("[{:>3}]", poll)).dim(),
        styled_status(task.status),
        progress_bar(&progress.dbs, 16),
        progress_bar(&progress.sqls, 8)
    );
    if progress.cells.total > 0 {
        line.push_str(&format!("  cells {}%", progress.cells.percent()));
    }
    line
}

pub(crate) fn instance_list(page: &Page<Instance>, page_no: u32, page_size: u32) {
    if page.items.is_empty() {
        println!("No instances registered.");
        return;
    }
    let mut table = Table::new(["ID", "NAME", "ADDRESS", "USER", "VERSION", "REMARK"]);
    for instance in &page.items {
        table.row(vec![
            instance.id.to_string(),
            truncate(&instance.name, 24),
            instance.address(),
            instance.username.clone(),
            instance.version.clone(),
            truncate(&instance.remark, 32),
        ]);
    }
    table.print();
    let pages = page.total.div_ceil(u64::from(page_size.max(1)));
    println!(
        "{}",
        style(format!(
            "page {} of {} ({} instances)",
            page_no,
            pages.max(1),
            page.total
        ))
        .dim()
    );
}

pub(crate) fn instance_detail(instance: &Instance, dbs: &[DatabaseInfo]) {
    let mut section = GuideSection::new(&format!("Instance #{}  {}", instance.id, instance.name))
        .status("Address", &instance.address())
        .status("User", &instance.username)
        .status("Version", &instance.version);
    for entry in &instance.params {
        for (key, value) in entry {
            section = section.status("Param", &format!("{}={}", key, value));
        }
    }
    if !instance.remark.is_empty() {
        section = section.status("Remark", &instance.remark);
    }
    section = section
        .status("Updated", &instance.updated_at)
        .status("Databases", &dbs.len().to_string());
    section.print();
    if !dbs.is_empty() {
        let names: Vec<&str> = dbs.iter().map(|db| db.name.as_str()).collect();
        println!("  {}", style(names.join("  ")).dim());
    }
    println!();
}

fn recent_table(tasks: &[RecentTask]) {
    let mut table = Table::new(["ID", "NAME", "STATUS", "CREATED"]);
    for task in tasks {
        table.row(vec![
            task.id.to_string(),
            truncate(&task.task_name, 40),
            styled_status(task.status).to_string(),
            task.created_at.clone().unwrap_or_default(),
        ]);
    }
    table.print();
}

pub(crate) fn dashboard(stats: &DashboardStats) {
    let counts = &stats.task_summary;
    GuideSection::new("Dashboard")
        .status("Instances", &stats.total_instances.to_string())
        .status("Tasks", &counts.total.to_string())
        .status("Pending", &counts.pending.to_string())
        .status("Running", &style(counts.running).cyan().to_string())
        .status("Completed", &style(counts.completed).green().to_string())
        .status("Failed", &style(counts.failed).red().to_string())
        .print();
    if !stats.recent_tasks.is_empty() {
        println!("\n{}", style("Recent tasks").bold());
        recent_table(&stats.recent_tasks);
    }
    if !stats.favorite_tasks.is_empty() {
        println!("\n{}", style("Favorite tasks").bold());
        recent_table(&stats.favorite_tasks);
    }
    println!();
}
