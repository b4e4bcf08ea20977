use console::{Emoji, StyledObject, measure_text_width, style};

use crate::core::task::aggregate::{Progress, TaskOutcome};
use crate::core::task::status::{Status, StatusTone};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

/// A titled block of help or status lines, printed in one go.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines.push(format!(
            "  {} {}",
            style(format!("{:<18}", name)).green().bold(),
            description
        ));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(format!("  {} {}", style(format!("{}:", label)).bold(), value));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        for line in text.lines() {
            self.lines.push(format!("  {}", line));
        }
        self
    }

    pub fn bullet(mut self, text: &str) -> Self {
        self.lines.push(format!("  {} {}", style("•").dim(), text));
        self
    }

    pub fn hint(mut self, command: &str, note: &str) -> Self {
        if note.is_empty() {
            self.lines.push(format!("  $ {}", style(command).cyan()));
        } else {
            self.lines.push(format!(
                "  $ {}  {}",
                style(command).cyan(),
                style(note).dim()
            ));
        }
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines
            .push(format!("  {}{}", WARN_ICON, style(text).yellow()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(self) {
        println!("\n{}", style(&self.title).bold().underlined());
        for line in self.lines {
            println!("{}", line);
        }
    }
}

pub fn styled_status(status: Status) -> StyledObject<String> {
    let d = status.descriptor();
    let text = match status {
        Status::Unknown(code) => format!("{} {} ({})", d.icon, d.label, code),
        _ => format!("{} {}", d.icon, d.label),
    };
    match d.tone {
        StatusTone::Neutral => style(text).dim(),
        StatusTone::Processing => style(text).cyan(),
        StatusTone::Success => style(text).green(),
        StatusTone::Error => style(text).red(),
        StatusTone::Warning => style(text).yellow(),
    }
}

pub fn styled_outcome(outcome: TaskOutcome) -> StyledObject<&'static str> {
    let label = outcome.label();
    match outcome {
        TaskOutcome::Succeeded => style(label).green(),
        TaskOutcome::CompletedWithFailures => style(label).yellow(),
        TaskOutcome::Failed => style(label).red(),
        TaskOutcome::InProgress => style(label).cyan(),
        TaskOutcome::NotStarted | TaskOutcome::Unknown => style(label).dim(),
    }
}

/// `[#####!!.....] 7/12 (1 failed)`
pub fn progress_bar(progress: &Progress, width: usize) -> String {
    let width = width.max(4);
    let total = progress.total.max(1) as usize;
    let done = (progress.completed as usize * width / total).min(width);
    let failed = (progress.failed as usize * width / total).min(width - done);
    let rest = width - done - failed;
    let mut bar = format!(
        "[{}{}{}] {}/{}",
        style("#".repeat(done)).green(),
        style("!".repeat(failed)).red(),
        ".".repeat(rest),
        progress.completed + progress.failed,
        progress.total
    );
    if progress.failed > 0 {
        bar.push_str(&format!(" ({} failed)", style(progress.failed).red()));
    }
    bar
}

/// Plain column-aligned table; cells may carry styling.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let columns = self.headers.len();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| measure_text_width(h)).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().take(columns).enumerate() {
                widths[i] = widths[i].max(measure_text_width(cell));
            }
        }

        let pad = |text: &str, width: usize| {
            let fill = width.saturating_sub(measure_text_width(text));
            format!("{}{}", text, " ".repeat(fill))
        };

        let mut out = String::new();
        let header: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| style(pad(h, *w)).bold().to_string())
            .collect();
        out.push_str(header.join("  ").trim_end());
        out.push('\n');
        for row in &self.rows {
            let line: Vec<String> = (0..columns)
                .map(|i| pad(row.get(i).map(String::as_str).unwrap_or(""), widths[i]))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

/// Shortens long text to `max` characters for table cells.
pub fn truncate(text: &str, max: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let cut: String = single_line.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
