#[path = "integration/pipeline.rs"]
mod pipeline;
#[path = "integration/shutdown.rs"]
mod shutdown;
#[path = "integration/ordering.rs"]
mod ordering;
