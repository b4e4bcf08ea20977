use anyhow::{Result, anyhow};

use super::CliContext;
use super::args::parse_positional_args;
use super::tasks::values_from_flags;
use crate::core::task::sql_split::split_statements;
use crate::core::templates::{QueryTaskTemplate, TemplateStore, TemplateValues};
use crate::core::terminal::{GuideSection, Table, print_success, truncate};

pub async fn run_templates_command(ctx: &CliContext, args: &[String]) -> Result<()> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };
    match sub_cmd {
        "list" | "ls" => {
            let store = ctx.template_store()?;
            list_templates(&store).await
        }
        "show" | "get" => {
            let name = template_name(args, "templates show <name>")?;
            let template = ctx
                .template_store()?
                .get(&name)
                .await?
                .ok_or_else(|| anyhow!("template '{}' not found", name))?;
            print_template(&template);
            Ok(())
        }
        "save" | "set" => {
            let name = template_name(args, "templates save <name> [creation flags]")?;
            let values = values_from_flags(args, 3)?;
            if values.is_empty() {
                return Err(anyhow!(
                    "nothing to save; pass creation flags such as --sql or --db"
                ));
            }
            ctx.template_store()?
                .upsert(&QueryTaskTemplate::new(name.clone(), values))
                .await?;
            print_success(&format!("Saved template '{}'", name));
            Ok(())
        }
        "delete" | "rm" => {
            let name = template_name(args, "templates delete <name>")?;
            if ctx.template_store()?.delete(&name).await? {
                print_success(&format!("Deleted template '{}'", name));
                Ok(())
            } else {
                Err(anyhow!("template '{}' not found", name))
            }
        }
        _ => {
            GuideSection::new("mybulker templates")
                .command("list", "Saved templates, most recent first")
                .command("show <name>", "Print the values a template carries")
                .command("save <name>", "Store creation flags (--name, --db, --sql, ...)")
                .command("delete <name>", "Remove a template")
                .blank()
                .hint("mybulker templates save nightly --mode exclude --db 1:tmp", "")
                .hint("mybulker tasks create --template nightly --name 'run 42'", "")
                .print();
            println!();
            Ok(())
        }
    }
}

fn template_name(args: &[String], usage: &str) -> Result<String> {
    parse_positional_args(args, 3)
        .into_iter()
        .next()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("Usage: mybulker {}", usage))
}

async fn list_templates<S: TemplateStore + ?Sized>(store: &S) -> Result<()> {
    let templates = store.list().await?;
    if templates.is_empty() {
        println!("No templates saved yet.");
        return Ok(());
    }
    let mut table = Table::new(["NAME", "SAVED", "MODE", "DATABASES", "STATEMENTS"]);
    for template in &templates {
        let v = &template.values;
        table.row(vec![
            template.name.clone(),
            template.created_at.format("%Y-%m-%d %H:%M").to_string(),
            v.database_mode.map(|m| m.as_str()).unwrap_or("").to_string(),
            v.selected_dbs
                .as_ref()
                .map(|dbs| dbs.len().to_string())
                .unwrap_or_default(),
            v.sql_content
                .as_deref()
                .map(|sql| split_statements(sql).len().to_string())
                .unwrap_or_default(),
        ]);
    }
    table.print();
    Ok(())
}

fn print_template(template: &QueryTaskTemplate) {
    let TemplateValues {
        task_name,
        description,
        instance_ids,
        database_mode,
        selected_dbs,
        sql_content,
    } = &template.values;

    let mut section = GuideSection::new(&format!("Template {}", template.name))
        .status("Saved", &template.created_at.to_rfc3339());
    if let Some(name) = task_name {
        section = section.status("Task name", name);
    }
    if let Some(description) = description {
        section = section.status("Description", description);
    }
    if let Some(ids) = instance_ids {
        let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
        section = section.status("Instances", &ids.join(", "));
    }
    if let Some(mode) = database_mode {
        section = section.status("Mode", mode.as_str());
    }
    if let Some(dbs) = selected_dbs {
        section = section.status("Databases", &dbs.len().to_string());
        for db in dbs {
            section = section.bullet(&db.label());
        }
    }
    if let Some(sql) = sql_content {
        section = section.blank();
        for (index, statement) in split_statements(sql).iter().enumerate() {
            section = section.text(&format!("{}. {}", index + 1, truncate(statement, 72)));
        }
    }
    section.print();
    println!();
}
