//! Metrics and observability utilities
//!
//! Metric names and descriptions for the metrics-rs facade. Recorders are
//! wired by the deployment; with none installed these are no-ops.

use metrics::{describe_counter, describe_histogram, Unit};

/// Metrics prefix for all Presail metrics
pub const METRICS_PREFIX: &str = "presail";

// Ingestion
pub const DOCUMENTS_INGESTED: &str = "presail_documents_ingested_total";
pub const INGESTION_FAILURES: &str = "presail_ingestion_failures_total";
pub const CHUNKS_INDEXED: &str = "presail_chunks_indexed_total";
pub const INGESTION_DURATION_SECONDS: &str = "presail_ingestion_duration_seconds";

// Retrieval & generation
pub const RETRIEVAL_QUERIES: &str = "presail_retrieval_queries_total";
pub const RETRIEVAL_DURATION_SECONDS: &str = "presail_retrieval_duration_seconds";
pub const GENERATION_REQUESTS: &str = "presail_generation_requests_total";
pub const GENERATION_DECLINED: &str = "presail_generation_declined_total";
pub const GENERATION_DURATION_SECONDS: &str = "presail_generation_duration_seconds";

// Workflow & analytics
pub const PROPOSAL_TRANSITIONS: &str = "presail_proposal_transitions_total";
pub const TRANSITION_CONFLICTS: &str = "presail_transition_conflicts_total";
pub const ANALYTICS_RECOMPUTES: &str = "presail_analytics_recomputes_total";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        DOCUMENTS_INGESTED,
        Unit::Count,
        "Documents that completed the ingestion pipeline"
    );
    describe_counter!(
        INGESTION_FAILURES,
        Unit::Count,
        "Documents whose ingestion ended in a failed status"
    );
    describe_counter!(
        CHUNKS_INDEXED,
        Unit::Count,
        "Chunk vectors upserted into the index"
    );
    describe_histogram!(
        INGESTION_DURATION_SECONDS,
        Unit::Seconds,
        "End-to-end document processing latency"
    );

    describe_counter!(
        RETRIEVAL_QUERIES,
        Unit::Count,
        "Retrieval queries executed"
    );
    describe_histogram!(
        RETRIEVAL_DURATION_SECONDS,
        Unit::Seconds,
        "Retrieval latency including query embedding"
    );
    describe_counter!(
        GENERATION_REQUESTS,
        Unit::Count,
        "Grounded generation requests"
    );
    describe_counter!(
        GENERATION_DECLINED,
        Unit::Count,
        "Chat answers declined for lack of grounded context"
    );
    describe_histogram!(
        GENERATION_DURATION_SECONDS,
        Unit::Seconds,
        "Generation latency including retrieval"
    );

    describe_counter!(
        PROPOSAL_TRANSITIONS,
        Unit::Count,
        "Successful proposal status transitions"
    );
    describe_counter!(
        TRANSITION_CONFLICTS,
        Unit::Count,
        "Transitions lost to a concurrent writer"
    );
    describe_counter!(
        ANALYTICS_RECOMPUTES,
        Unit::Count,
        "Analytics snapshots recomputed from history"
    );
}
