pub mod evaluate;
pub mod input;
pub mod predict;
pub mod promote;
pub mod train;
