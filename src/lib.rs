pub mod animation;
pub mod disc;
pub mod math;
pub mod model;
pub mod scene;
pub mod table;
