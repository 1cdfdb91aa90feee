// Assignment cache, labelled by backend and outcome
pub const ASSIGNMENTS_LOADS_COUNTER: &str = "decision_assignments_loads_total";
pub const ASSIGNMENTS_SAVES_COUNTER: &str = "decision_assignments_saves_total";

// Environment loader
pub const ENVIRONMENT_POLLS_COUNTER: &str = "decision_environment_polls_total";
pub const ENVIRONMENT_LAST_UPDATE_GAUGE: &str = "decision_environment_last_update_timestamp";

// Hit batching
pub const HITS_TRACKED_COUNTER: &str = "decision_hits_tracked_total";
pub const HITS_SENT_COUNTER: &str = "decision_hits_sent_total";
pub const HITS_DROPPED_COUNTER: &str = "decision_hits_dropped_total";
pub const HITS_BATCH_SIZE: &str = "decision_hits_batch_size";
pub const HITS_FLUSH_TIME: &str = "decision_hits_flush_time_ms";
