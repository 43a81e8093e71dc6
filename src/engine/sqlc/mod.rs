//! Backend-neutral query conditions

pub mod cnd;
pub mod value;

pub use cnd::{
    CacheConfig, Cnd, Condition, FromCond, JoinCond, Logic, ModelRef, Operand, Pagination,
};
pub use value::SqlValue;
