//! Logical key layout in the coordination store

const NAMESPACE: &str = "polycity";

/// Global list of active job identifiers (resume-scan source)
pub fn active_jobs() -> String {
    format!("{}:jobs", NAMESPACE)
}

/// Job progress hash (config + counters + completed flag)
pub fn job(job_id: &str) -> String {
    format!("{}:job:{}", NAMESPACE, job_id)
}

/// Append-only failure ledger
pub fn failures(job_id: &str) -> String {
    format!("{}:job:{}:failures", NAMESPACE, job_id)
}

/// Append-only serialized footprint list
pub fn footprints(job_id: &str) -> String {
    format!("{}:job:{}:footprints", NAMESPACE, job_id)
}

/// Dedup set of identifiers already split and enqueued (transient)
pub fn dedup(job_id: &str) -> String {
    format!("{}:job:{}:split", NAMESPACE, job_id)
}

/// Identifiers generated for elements without one, keyed by element ordinal
pub fn generated_ids(job_id: &str) -> String {
    format!("{}:job:{}:generated_ids", NAMESPACE, job_id)
}

/// Items that reached a terminal outcome; gates the per-item counters
pub fn settled(job_id: &str) -> String {
    format!("{}:job:{}:settled", NAMESPACE, job_id)
}

/// Every key owned by one job, the progress hash first
pub fn all_for_job(job_id: &str) -> [String; 6] {
    [
        job(job_id),
        settled(job_id),
        failures(job_id),
        footprints(job_id),
        dedup(job_id),
        generated_ids(job_id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_keys_are_namespaced() {
        assert_eq!(job("abc"), "polycity:job:abc");
        assert_eq!(footprints("abc"), "polycity:job:abc:footprints");
        assert!(all_for_job("abc").iter().all(|k| k.starts_with("polycity:job:abc")));
        assert_eq!(all_for_job("abc")[0], job("abc"));
    }
}
