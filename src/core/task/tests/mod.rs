mod state_machine;

use crate::core::task::model::{QueryTask, QueryTaskExecution, SqlExecutions};
use crate::core::task::status::Status;

fn task(status: Status) -> QueryTask {
    QueryTask {
        id: 1,
        task_name: "nightly audit".to_string(),
        description: String::new(),
        databases: String::new(),
        status,
        total_dbs: 0,
        completed_dbs: 0,
        failed_dbs: 0,
        total_sqls: 0,
        completed_sqls: 0,
        failed_sqls: 0,
        is_favorite: false,
        created_at: String::new(),
        updated_at: String::new(),
        started_at: None,
        completed_at: None,
    }
}

fn cell(id: u64, sql_id: u64, db: &str, status: Status) -> QueryTaskExecution {
    QueryTaskExecution {
        id,
        task_id: 1,
        sql_id,
        instance_id: 1,
        instance_name: "prod".to_string(),
        database_name: db.to_string(),
        status,
        error_message: None,
        result_count: None,
        execution_time: None,
        started_at: None,
        completed_at: None,
    }
}

fn sql(id: u64, order: u32, executions: Vec<QueryTaskExecution>) -> SqlExecutions {
    SqlExecutions {
        id,
        sql_order: order,
        sql_content: format!("SELECT {}", order),
        executions,
    }
}
