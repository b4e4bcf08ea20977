mod cli;
mod core;
mod logging;
mod platform;

use inquire::InquireError;

use crate::core::terminal;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_main().await {
        if matches!(
            e.downcast_ref::<InquireError>(),
            Some(InquireError::OperationCanceled | InquireError::OperationInterrupted)
        ) {
            terminal::print_warn("Cancelled.");
            std::process::exit(130);
        }
        terminal::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
