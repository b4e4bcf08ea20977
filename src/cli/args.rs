use anyhow::{Result, anyhow};

use crate::core::task::model::{SortDirection, TaskDatabase};

/// Flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &[
    "--api-url",
    "--log-file",
    "--name",
    "--description",
    "--instances",
    "--instance",
    "--mode",
    "--db",
    "--sql",
    "--sql-file",
    "--template",
    "--save-template",
    "--status",
    "--page",
    "--page-size",
    "--sort",
    "--filter",
    "--database",
    "--out",
    "--interval",
    "--host",
    "--port",
    "--user",
    "--password",
    "--remark",
    "--param",
];

pub(crate) fn parse_string_flag(args: &[String], start: usize, flag: &str) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
            return None;
        }
        i += 1;
    }
    None
}

/// Every value of a flag that may be given more than once.
pub(crate) fn parse_repeated_flag(args: &[String], start: usize, flag: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = start;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            out.push(args[i + 1].clone());
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

pub(crate) fn has_flag(args: &[String], start: usize, names: &[&str]) -> bool {
    args.iter()
        .skip(start)
        .any(|arg| names.contains(&arg.as_str()))
}

pub(crate) fn parse_positional_args(args: &[String], start: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = start;
    while i < args.len() {
        let arg = args[i].as_str();
        if VALUE_FLAGS.contains(&arg) {
            i += 2;
        } else if arg.starts_with("--") || arg == "-v" || arg == "-y" || arg == "-h" {
            i += 1;
        } else {
            out.push(args[i].clone());
            i += 1;
        }
    }
    out
}

pub(crate) fn parse_u32_flag(args: &[String], start: usize, flag: &str) -> Result<Option<u32>> {
    match parse_string_flag(args, start, flag) {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| anyhow!("{} expects a number, got '{}'", flag, raw)),
        None => Ok(None),
    }
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| anyhow!("invalid {} '{}'", what, raw))
}

/// Ids given as separate arguments, comma lists, or both.
pub(crate) fn parse_id_list(values: &[String], what: &str) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for value in values {
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            ids.push(parse_id(part, what)?);
        }
    }
    Ok(ids)
}

/// `3:orders` names database `orders` on instance 3.
pub(crate) fn parse_db_ref(raw: &str) -> Result<TaskDatabase> {
    let (instance, database) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("database '{}' must look like <instance_id>:<database>", raw))?;
    let database = database.trim();
    if database.is_empty() {
        return Err(anyhow!("database '{}' has no name", raw));
    }
    Ok(TaskDatabase::new(parse_id(instance, "instance id")?, database))
}

pub(crate) fn parse_db_refs(values: &[String]) -> Result<Vec<TaskDatabase>> {
    let mut out = Vec::new();
    for value in values {
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            out.push(parse_db_ref(part)?);
        }
    }
    Ok(out)
}

/// `column=value`
pub(crate) fn parse_filter(raw: &str) -> Result<(String, String)> {
    let (column, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("filter '{}' must look like <column>=<value>", raw))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(anyhow!("filter '{}' has no column", raw));
    }
    Ok((column.to_string(), value.to_string()))
}

/// `key=value` DSN parameter of an instance.
pub(crate) fn parse_param(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("parameter '{}' must look like <key>=<value>", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("parameter '{}' has no key", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

pub(crate) fn parse_port_flag(args: &[String], start: usize) -> Result<Option<u16>> {
    match parse_u32_flag(args, start, "--port")? {
        Some(port) => u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .map(Some)
            .ok_or_else(|| anyhow!("--port must be between 1 and 65535, got {}", port)),
        None => Ok(None),
    }
}

/// `column`, `column:asc` or `column:desc`; ascending when no direction is given.
pub(crate) fn parse_sort(raw: &str) -> Result<(String, SortDirection)> {
    let (column, direction) = match raw.rsplit_once(':') {
        Some((column, direction)) => (
            column,
            SortDirection::from_name(direction)
                .ok_or_else(|| anyhow!("unknown sort direction '{}'", direction))?,
        ),
        None => (raw, SortDirection::Ascend),
    };
    let column = column.trim();
    if column.is_empty() {
        return Err(anyhow!("sort '{}' has no column", raw));
    }
    Ok((column.to_string(), direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("mybulker")
            .chain(parts.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn positional_args_skip_flags_and_their_values() {
        let args = argv(&[
            "tasks", "delete", "4", "--api-url", "http://x", "5,6", "--yes", "7",
        ]);
        assert_eq!(parse_positional_args(&args, 3), vec!["4", "5,6", "7"]);
    }

    #[test]
    fn repeated_flags_keep_every_value() {
        let args = argv(&["results", "show", "--filter", "a=1", "--filter", "b=2"]);
        assert_eq!(
            parse_repeated_flag(&args, 2, "--filter"),
            vec!["a=1".to_string(), "b=2".to_string()]
        );
        assert_eq!(parse_string_flag(&args, 2, "--filter").as_deref(), Some("a=1"));
        assert_eq!(parse_string_flag(&args, 2, "--sort"), None);
    }

    #[test]
    fn id_lists_accept_commas_and_separate_args() {
        let ids = parse_id_list(&["1,2".to_string(), "3".to_string()], "task id").unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(parse_id_list(&["x".to_string()], "task id").is_err());
    }

    #[test]
    fn db_refs_need_instance_and_name() {
        let dbs = parse_db_refs(&["1:orders,2:users".to_string()]).unwrap();
        assert_eq!(dbs[0].instance_id, 1);
        assert_eq!(dbs[1].database_name, "users");
        assert!(parse_db_ref("orders").is_err());
        assert!(parse_db_ref("1:").is_err());
    }

    #[test]
    fn filters_and_sorts() {
        assert_eq!(
            parse_filter("city=New York").unwrap(),
            ("city".to_string(), "New York".to_string())
        );
        assert!(parse_filter("=x").is_err());
        assert_eq!(
            parse_sort("amount:desc").unwrap(),
            ("amount".to_string(), SortDirection::Descend)
        );
        assert_eq!(parse_sort("name").unwrap().1, SortDirection::Ascend);
        assert!(parse_sort("name:sideways").is_err());
    }

    #[test]
    fn params_and_ports() {
        assert_eq!(
            parse_param("charset = utf8mb4").unwrap(),
            ("charset".to_string(), "utf8mb4".to_string())
        );
        assert!(parse_param("charset").is_err());
        let args = argv(&["instances", "add", "--port", "70000"]);
        assert!(parse_port_flag(&args, 3).is_err());
        let args = argv(&["instances", "add", "--port", "3307"]);
        assert_eq!(parse_port_flag(&args, 3).unwrap(), Some(3307));
    }

    #[test]
    fn numeric_flags_report_bad_values() {
        let args = argv(&["tasks", "list", "--page", "two"]);
        assert!(parse_u32_flag(&args, 2, "--page").is_err());
        let args = argv(&["tasks", "list", "--page", "2"]);
        assert_eq!(parse_u32_flag(&args, 2, "--page").unwrap(), Some(2));
    }
}
