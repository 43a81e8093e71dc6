pub mod datetime;
pub mod snowflake;

pub use snowflake::next_id;
