pub mod console;
pub mod state;

pub use console::ConsoleApp;
pub use state::AppState;
