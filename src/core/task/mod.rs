pub mod aggregate;
pub mod create;
pub mod model;
pub mod results;
pub mod schema;
pub mod sql_split;
pub mod status;
pub mod transition;

#[cfg(test)]
mod tests;
