pub mod history;
pub mod position;
pub mod price;
pub mod projection;
pub mod setup;
pub mod summary;
pub mod ui;
