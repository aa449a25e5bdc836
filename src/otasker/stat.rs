//! Snapshot records for the sessions introspection page.

use serde::Serialize;

/// One instrumented step of the last (or current) run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStep {
    pub name: String,
    pub duration_ms: i64,
    pub statement: String,
}

/// The introspection view of one worker's tasker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskerStat {
    #[serde(skip)]
    pub sort_key: String,
    pub handler_id: String,
    pub message_id: String,
    pub database: String,
    pub user_name: String,
    pub session_id: String,
    pub created: String,
    pub request_proceeded: u32,
    pub errors_number: u32,
    pub idle_time_ms: i64,
    pub last_duration_ms: i64,
    pub last_steps: Vec<TaskStep>,
    pub step_num: i64,
    pub step_name: String,
    pub last_procedure: String,
    pub now_in_process: bool,
}

fn int_key(v: i64) -> String {
    format!("{:040}", v)
}

impl TaskerStat {
    /// Fill `sort_key` from the named field, zero-padding numbers so the
    /// lexicographic sort orders them correctly.
    pub fn compute_sort_key(&mut self, field: &str) {
        self.sort_key = match field {
            "Created" => self.created.clone(),
            "UserName" => self.user_name.clone(),
            "SessionID" => self.session_id.clone(),
            "Database" => self.database.clone(),
            "MessageID" => self.message_id.clone(),
            "NowInProcess" => self.now_in_process.to_string(),
            "IdleTime" => int_key(self.idle_time_ms),
            "LastDuration" => int_key(self.last_duration_ms),
            "RequestProceeded" => int_key(self.request_proceeded as i64),
            "ErrorsNumber" => int_key(self.errors_number as i64),
            _ => String::new(),
        };
    }
}

/// Sort a snapshot by the precomputed keys.
pub fn sort_stats(stats: &mut [TaskerStat], reversed: bool) {
    stats.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
    if reversed {
        stats.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(user: &str, idle_ms: i64) -> TaskerStat {
        TaskerStat {
            user_name: user.to_string(),
            idle_time_ms: idle_ms,
            ..TaskerStat::default()
        }
    }

    #[test]
    fn numeric_fields_sort_numerically() {
        let mut stats = vec![stat("a", 900), stat("b", 10_000), stat("c", 5)];
        for s in &mut stats {
            s.compute_sort_key("IdleTime");
        }
        sort_stats(&mut stats, false);
        let users: Vec<_> = stats.iter().map(|s| s.user_name.as_str()).collect();
        assert_eq!(users, vec!["c", "a", "b"]);
    }

    #[test]
    fn string_fields_sort_lexicographically_and_reverse() {
        let mut stats = vec![stat("bob", 0), stat("alice", 0)];
        for s in &mut stats {
            s.compute_sort_key("UserName");
        }
        sort_stats(&mut stats, true);
        assert_eq!(stats[0].user_name, "bob");
    }

    #[test]
    fn unknown_sort_field_yields_empty_key() {
        let mut s = stat("x", 0);
        s.compute_sort_key("Nope");
        assert_eq!(s.sort_key, "");
    }
}
