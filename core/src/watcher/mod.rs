mod dispatcher;
pub mod tail;
mod worker;

pub use dispatcher::{Backoff, ChangeNotifier, Dispatcher, is_backup_file};
pub use tail::{LogTail, TailLine, TailRead};
pub use worker::{ServerWorker, run_to_end};
