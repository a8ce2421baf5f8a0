//! Key layout inside the shared store.
//!
//! ```text
//! event:<event_id>                 ProcessedEventMarker
//! lock:<operation>:<scope>         LockRecord
//! session:<id>                     Session envelope
//! job:active:<class>:<owner>       ActiveJobMarker
//! job:report:<class>:<owner>       last JobReport
//! analysis:<owner>/<item>          last-analyzed timestamp
//! ```

pub fn event(event_id: &str) -> String {
    format!("event:{event_id}")
}

pub fn lock(name: &str) -> String {
    format!("lock:{name}")
}

pub fn session(id: &str) -> String {
    format!("session:{id}")
}

pub fn active_job(class: &str, owner: &str) -> String {
    format!("job:active:{class}:{owner}")
}

pub fn job_report(class: &str, owner: &str) -> String {
    format!("job:report:{class}:{owner}")
}

pub fn analysis(owner: &str, item: &str) -> String {
    format!("analysis:{owner}/{item}")
}
