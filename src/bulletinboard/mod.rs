pub mod board;
pub mod electionboard;

pub use board::{Ledger, MemLedger};
pub use electionboard::ElectionBoard;

quick_error! {
    #[derive(Debug)]
    pub enum BBError {
        Bincode(err: bincode::Error) {
            from()
            display("{}", err)
        }
        Msg(message: String) {
            from()
            display("{}", message)
        }
    }
}
