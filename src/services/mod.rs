pub mod clock;
pub mod dispatcher;
pub mod messaging;
pub mod plan;
pub mod scheduler;
pub mod status;
pub mod templates;
pub mod worker;
