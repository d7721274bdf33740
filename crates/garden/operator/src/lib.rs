pub mod ctx;
pub mod flow;
pub mod lifecycle;
pub mod scheduler;
pub mod status;

pub mod consts {
    pub const NAME: &str = "garden-operator";
}
