//! The Oracle tasker: a single-threaded state machine holding one database
//! connection and walking a fixed sequence of instrumented steps per request.
//!
//! Exactly one worker thread drives `run`; cancellation and introspection go
//! through the shared [`TaskerShared`] handle, which never touches the
//! in-flight connection. `Break` opens a *separate* connection as the same
//! user and kills the pinned session by its cached id.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Local};
use oracle::sql_type::OracleType;

use crate::error::{Error, Result};
use crate::otasker::bind::{
    self, prepare_param, prepare_string, push_cgi_env, push_ext_params, push_package_name,
    WrapperParts,
};
use crate::otasker::describe::DescriptorCache;
use crate::otasker::dump::write_dump;
use crate::otasker::flavor::Flavor;
use crate::otasker::stat::{TaskStep, TaskerStat};
use crate::otasker::textutil::{add_cr, extract_file_name, fix_content_type, fix_meta, parse_headers};
use crate::otasker::{pack_error, TaskResult, Tasker, TaskerControl, Work};

const STEP_CONNECT: u8 = 0;
const STEP_EVAL_SID: u8 = 1;
const STEP_DESCRIBE: u8 = 2;
const STEP_SAVE_FILE: u8 = 3;
const STEP_RUN: u8 = 4;
const STEP_CHUNK_GET: u8 = 5;
const STEP_DISCONNECT: u8 = 6;

#[derive(Debug)]
struct StepRecord {
    name: String,
    began: Instant,
    finished: Option<Instant>,
    statement: String,
    echo: String,
    success: bool,
}

#[derive(Debug)]
struct TaskerState {
    conn_user: String,
    conn_pass: String,
    conn_str: String,
    sess_id: String,
    has_conn: bool,
    is_working: bool,
    created_at: DateTime<Local>,
    last_finish: Option<Instant>,
    steps: BTreeMap<u8, StepRecord>,
    requests_proceeded: u32,
    errors_num: u32,
    log_session_key: String,
    log_task_id: String,
    log_user: String,
    log_conn_str: String,
    log_proc: String,
}

impl TaskerState {
    fn new() -> Self {
        Self {
            conn_user: String::new(),
            conn_pass: String::new(),
            conn_str: String::new(),
            sess_id: String::new(),
            has_conn: false,
            is_working: false,
            created_at: Local::now(),
            last_finish: None,
            steps: BTreeMap::new(),
            requests_proceeded: 0,
            errors_num: 0,
            log_session_key: String::new(),
            log_task_id: String::new(),
            log_user: String::new(),
            log_conn_str: String::new(),
            log_proc: String::new(),
        }
    }
}

/// Cross-thread view of a tasker: the mutable state under a lock plus the
/// flavor's kill statement.
pub struct TaskerShared {
    flavor: &'static Flavor,
    state: Mutex<TaskerState>,
}

impl TaskerShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, TaskerState> {
        self.state.lock().expect("tasker state poisoned")
    }

    fn open_step(&self, id: u8, kind: &str) {
        let mut st = self.lock();
        st.steps.insert(
            id,
            StepRecord {
                name: format!("{:03} - {}", id, kind),
                began: Instant::now(),
                finished: None,
                statement: String::new(),
                echo: String::new(),
                success: false,
            },
        );
    }

    fn close_step(&self, id: u8) {
        let mut st = self.lock();
        if let Some(step) = st.steps.get_mut(&id) {
            step.finished = Some(Instant::now());
        }
    }

    fn set_step_info(&self, id: u8, statement: &str, echo: &str, success: bool) {
        let mut st = self.lock();
        if let Some(step) = st.steps.get_mut(&id) {
            step.statement = statement.to_string();
            step.echo = echo.to_string();
            step.success = success;
        }
    }

    /// Statement and echo form of the most recent step, for the error dump.
    fn last_statements(&self) -> (String, String) {
        let st = self.lock();
        match st.steps.iter().next_back() {
            Some((_, step)) => (step.statement.clone(), step.echo.clone()),
            None => (String::new(), String::new()),
        }
    }
}

impl TaskerControl for TaskerShared {
    fn interrupt(&self) -> Result<()> {
        let (user, pass, conn_str, sess_id) = {
            let st = self.lock();
            if !st.is_working || !st.has_conn {
                // nothing in flight, nothing to cancel
                return Ok(());
            }
            if st.sess_id.is_empty() {
                return Err(Error::Internal("no session information".into()));
            }
            (
                st.conn_user.clone(),
                st.conn_pass.clone(),
                st.conn_str.clone(),
                st.sess_id.clone(),
            )
        };
        kill_session(self.flavor.kill_session, &user, &pass, &conn_str, &sess_id)
    }

    fn stat(&self, sort_key: &str) -> TaskerStat {
        let st = self.lock();
        let mut steps = Vec::with_capacity(st.steps.len());
        let mut total_ms: i64 = 0;
        let mut open_step_name = String::new();
        for step in st.steps.values() {
            let dur = match step.finished {
                Some(fin) => fin.duration_since(step.began),
                None => {
                    open_step_name = step.name.clone();
                    step.began.elapsed()
                }
            };
            let ms = dur.as_millis() as i64;
            total_ms += ms;
            steps.push(TaskStep {
                name: step.name.clone(),
                duration_ms: ms,
                statement: step.echo.clone(),
            });
        }
        let mut stat = TaskerStat {
            sort_key: String::new(),
            handler_id: st.log_session_key.clone(),
            message_id: st.log_task_id.clone(),
            database: st.log_conn_str.clone(),
            user_name: st.log_user.clone(),
            session_id: st.sess_id.clone(),
            created: st.created_at.to_rfc3339(),
            request_proceeded: st.requests_proceeded,
            errors_number: st.errors_num,
            idle_time_ms: st
                .last_finish
                .map(|t| t.elapsed().as_millis() as i64)
                .unwrap_or(0),
            last_duration_ms: total_ms,
            step_num: steps.len() as i64 + 1,
            step_name: open_step_name,
            last_procedure: st.log_proc.clone(),
            now_in_process: st.is_working,
            last_steps: steps,
        };
        stat.compute_sort_key(sort_key);
        stat
    }
}

/// The Oracle-backed tasker.
pub struct OracleTasker {
    flavor: &'static Flavor,
    descriptors: Arc<DescriptorCache>,
    conn: Option<oracle::Connection>,
    shared: Arc<TaskerShared>,
}

impl OracleTasker {
    pub fn new(flavor: &'static Flavor, descriptors: Arc<DescriptorCache>) -> Self {
        Self {
            flavor,
            descriptors,
            conn: None,
            shared: Arc::new(TaskerShared {
                flavor,
                state: Mutex::new(TaskerState::new()),
            }),
        }
    }

    fn init_log(&self, work: &Work) {
        let mut st = self.shared.lock();
        st.steps.clear();
        st.requests_proceeded += 1;
        st.log_session_key = work.session_key.clone();
        st.log_task_id = work.task_id.clone();
        st.log_user = work.user_name.clone();
        st.log_conn_str = work.conn_str.clone();
        st.log_proc = work.proc_name.clone();
        st.is_working = true;
    }

    fn connect(&mut self, user: &str, pass: &str, conn_str: &str) -> Result<()> {
        let reusable = {
            let st = self.shared.lock();
            self.conn.is_some()
                && st.conn_user == user
                && st.conn_pass == pass
                && st.conn_str == conn_str
        };
        if reusable {
            return Ok(());
        }
        self.disconnect();

        self.shared.open_step(STEP_CONNECT, "connect");
        self.shared.set_step_info(STEP_CONNECT, "connect", "connect", false);
        let result = (|| -> Result<()> {
            let conn = oracle::Connection::connect(user, pass, conn_str)?;
            self.conn = Some(conn);
            {
                let mut st = self.shared.lock();
                st.conn_user = user.to_string();
                st.conn_pass = pass.to_string();
                st.conn_str = conn_str.to_string();
                st.has_conn = true;
            }
            self.eval_session_id()?;
            self.shared.set_step_info(STEP_CONNECT, "connect", "connect", true);
            Ok(())
        })();
        self.shared.close_step(STEP_CONNECT);
        result
    }

    fn eval_session_id(&mut self) -> Result<()> {
        self.shared.open_step(STEP_EVAL_SID, "evalSessionID");
        let stm = self.flavor.eval_session_id;
        self.shared.set_step_info(STEP_EVAL_SID, stm, stm, false);
        let result = (|| -> Result<()> {
            let conn = self.conn.as_ref().ok_or_else(|| {
                Error::Internal("session id probe without a connection".into())
            })?;
            let sess_id: String = conn.query_row_as(stm, &[])?;
            self.shared.lock().sess_id = sess_id;
            self.shared.set_step_info(STEP_EVAL_SID, stm, stm, true);
            Ok(())
        })();
        self.shared.close_step(STEP_EVAL_SID);
        result
    }

    fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.open_step(STEP_DISCONNECT, "disconnect");
            self.shared
                .set_step_info(STEP_DISCONNECT, "disconnect", "disconnect", false);
            if let Err(err) = conn.close() {
                tracing::debug!("connection close reported: {}", err);
            }
            self.shared
                .set_step_info(STEP_DISCONNECT, "disconnect", "disconnect", true);
            self.shared.close_step(STEP_DISCONNECT);
        }
        let mut st = self.shared.lock();
        st.conn_user.clear();
        st.conn_pass.clear();
        st.conn_str.clear();
        st.sess_id.clear();
        st.has_conn = false;
    }

    fn call_procedure(&mut self, res: &mut TaskResult, work: &Work) -> Result<()> {
        self.shared.open_step(STEP_RUN, "run");
        let result = self.call_procedure_inner(res, work);
        self.shared.close_step(STEP_RUN);
        result
    }

    fn call_procedure_inner(&mut self, res: &mut TaskResult, work: &Work) -> Result<()> {
        let mut env = work.cgi_env.clone();
        let segments: Vec<&str> = work.proc_name.split('/').collect();
        if segments.len() > 1 {
            env.insert(
                "X-APEX-BASE".to_string(),
                format!("/{}", segments[0]),
            );
        }

        let mut parts = WrapperParts::default();
        let mut ext: Vec<(String, String)> = Vec::new();
        let proc_name;
        let package;

        if segments.len() > 1 {
            // resource shape: fixed procedure, no metadata lookup
            proc_name = "get_resource".to_string();
            package = String::new();

            let module = format!(
                "{}/{}/",
                segments[0],
                segments.get(1).copied().unwrap_or_default()
            );
            let method = env.get("REQUEST_METHOD").cloned().unwrap_or_default();
            let rest = segments[2..].join("/");
            prepare_string(&mut parts, "amodule", &module, "varchar2", "");
            prepare_string(&mut parts, "amethod", &method, "varchar2", "");
            prepare_string(&mut parts, "aurl", &rest, "varchar2", "");
        } else {
            proc_name = work.proc_name.clone();

            self.shared.open_step(STEP_DESCRIBE, "Describe");
            let described = {
                let conn = self.conn.as_ref().ok_or_else(|| {
                    Error::Internal("describe without a connection".into())
                })?;
                self.descriptors.describe(conn, &work.conn_str, &proc_name)
            };
            self.shared.close_step(STEP_DESCRIBE);
            described?;

            for (field, file_parts) in &work.form.files {
                let file_names = self.save_files(work, file_parts)?;
                let (arg_type, arg_type_name) = self
                    .descriptors
                    .argument_info(&work.conn_str, &proc_name, field)
                    .unwrap_or((bind::TYPE_UNKNOWN, String::new()));
                prepare_param(
                    &mut parts,
                    field,
                    &file_names,
                    arg_type,
                    &arg_type_name,
                    &work.param_store_proc,
                )?;
                ext.push((
                    field.clone(),
                    file_names.first().cloned().unwrap_or_default(),
                ));
            }

            for (name, values) in &work.params {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let (arg_type, arg_type_name) = self
                    .descriptors
                    .argument_info(&work.conn_str, &proc_name, name)
                    .unwrap_or((bind::TYPE_UNKNOWN, String::new()));
                prepare_param(
                    &mut parts,
                    name,
                    values,
                    arg_type,
                    &arg_type_name,
                    &work.param_store_proc,
                )?;
                ext.push((
                    name.to_string(),
                    values.first().cloned().unwrap_or_default(),
                ));
            }

            package = self
                .descriptors
                .procedure_info(&work.conn_str, &proc_name)?
                .1;
        }

        let mut head = WrapperParts::default();
        push_cgi_env(&mut head, env.iter(), env.len());
        push_ext_params(&mut head, &ext);
        push_package_name(&mut head, &package);

        let exec_set = format!("{}{}", head.exec_set, parts.exec_set);
        let show_set = format!("{}{}", head.show_set, parts.show_set);

        let statement = self.flavor.render_main(
            &parts.exec_declare,
            &exec_set,
            &work.before_script,
            &parts.exec_store,
            &proc_name,
            &parts.exec_args,
            &work.after_script,
        );
        let echo = self.flavor.render_main(
            &parts.show_declare,
            &show_set,
            &work.before_script,
            &parts.show_store,
            &proc_name,
            &parts.show_args,
            &work.after_script,
        );
        self.shared.set_step_info(STEP_RUN, &statement, &echo, false);

        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Error::Internal("execute without a connection".into()))?;
        let mut stmt = conn.statement(&statement).build()?;
        for (name, value) in &parts.binds {
            stmt.bind(name.as_str(), value)?;
        }
        stmt.bind("ContentType", &OracleType::Varchar2(1024))?;
        stmt.bind("ContentLength", &0i64)?;
        stmt.bind("CustomHeaders", &OracleType::Varchar2(32767))?;
        stmt.bind("rc__", &0i64)?;
        stmt.bind("content__", &OracleType::Varchar2(32767))?;
        stmt.bind("bNextChunkExists", &0i64)?;
        stmt.bind("lob__", &OracleType::BLOB)?;
        stmt.bind("sqlerrcode", &0i64)?;
        stmt.bind("sqlerrm", &OracleType::Varchar2(32767))?;
        stmt.bind("sqlerrtrace", &OracleType::Varchar2(32767))?;
        stmt.execute(&[])?;

        check_wrapper_error(&stmt)?;

        let mut content_type = stmt
            .bind_value::<_, Option<String>>("ContentType")?
            .unwrap_or_default();
        let custom = stmt
            .bind_value::<_, Option<String>>("CustomHeaders")?
            .unwrap_or_default();
        let mut headers = parse_headers(&custom);
        // EKB delivers the content type through the custom headers
        headers.retain(|(name, value)| {
            if name.eq_ignore_ascii_case("content-type") {
                content_type = value.clone();
                false
            } else {
                true
            }
        });
        res.headers = headers;
        res.content_type = content_type;

        let rc: i64 = stmt.bind_value("rc__")?;
        match rc {
            0 => {
                let data = stmt.bind_value::<_, Option<String>>("content__")?;
                let Some(data) = data else {
                    self.shared.set_step_info(STEP_RUN, &statement, &echo, true);
                    return Ok(());
                };
                // the database always hands back UTF-8
                res.content.extend_from_slice(add_cr(&data).as_bytes());
                let more: i64 = stmt.bind_value("bNextChunkExists")?;
                if more != 0 {
                    self.drain_chunks(res)?;
                }
                let (fixed, _, _) = fix_content_type(&res.content_type);
                res.content_type = fixed;
                res.content = fix_meta(std::mem::take(&mut res.content));
            }
            _ => {
                let lob = stmt
                    .bind_value::<_, Option<Vec<u8>>>("lob__")?
                    .unwrap_or_default();
                res.content = lob;
                if res.content_type.is_empty() {
                    res.content_type = "application/octet-stream".to_string();
                }
            }
        }
        if res.content_type.is_empty() {
            res.content_type = "text/html".to_string();
        }

        self.shared.set_step_info(STEP_RUN, &statement, &echo, true);
        Ok(())
    }

    fn drain_chunks(&self, res: &mut TaskResult) -> Result<()> {
        self.shared.open_step(STEP_CHUNK_GET, "getRestChunks");
        let stm = self.flavor.get_rest_chunk;
        self.shared.set_step_info(STEP_CHUNK_GET, stm, stm, true);
        let result = (|| -> Result<()> {
            let conn = self
                .conn
                .as_ref()
                .ok_or_else(|| Error::Internal("chunk drain without a connection".into()))?;
            let mut stmt = conn.statement(stm).build()?;
            stmt.bind("Data", &OracleType::Varchar2(32767))?;
            stmt.bind("bNextChunkExists", &1i64)?;
            stmt.bind("sqlerrcode", &0i64)?;
            stmt.bind("sqlerrm", &OracleType::Varchar2(32767))?;
            stmt.bind("sqlerrtrace", &OracleType::Varchar2(32767))?;
            loop {
                stmt.execute(&[])?;
                check_wrapper_error(&stmt)?;
                if let Some(data) = stmt.bind_value::<_, Option<String>>("Data")? {
                    res.content.extend_from_slice(add_cr(&data).as_bytes());
                }
                let more: i64 = stmt.bind_value("bNextChunkExists")?;
                if more == 0 {
                    return Ok(());
                }
            }
        })();
        self.shared.close_step(STEP_CHUNK_GET);
        result
    }

    fn save_files(
        &self,
        work: &Work,
        parts: &[crate::otasker::FilePart],
    ) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(parts.len());
        for part in parts {
            let mut name = extract_file_name(&part.content_disposition);
            if name.is_empty() {
                name = part.filename.clone();
            }
            names.push(self.save_file_to_db(work, part, &name)?);
        }
        Ok(names)
    }

    fn save_file_to_db(
        &self,
        work: &Work,
        part: &crate::otasker::FilePart,
        file_name: &str,
    ) -> Result<String> {
        self.shared.open_step(STEP_SAVE_FILE, "saveFileToDB");
        let result = self.save_file_to_db_inner(work, part, file_name);
        self.shared.close_step(STEP_SAVE_FILE);
        result
    }

    fn save_file_to_db_inner(
        &self,
        work: &Work,
        part: &crate::otasker::FilePart,
        file_name: &str,
    ) -> Result<String> {
        let mut head = WrapperParts::default();
        push_cgi_env(&mut head, work.cgi_env.iter(), work.cgi_env.len());

        let statement = self.flavor.render_file_upload(
            &head.exec_set,
            &work.before_script,
            &work.document_table,
        );
        self.shared
            .set_step_info(STEP_SAVE_FILE, &statement, &statement, false);

        let form_value = |key: &str| -> String {
            work.params
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| v.first())
                .cloned()
                .unwrap_or_default()
        };

        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Error::Internal("file upload without a connection".into()))?;
        let content: &[u8] = &part.content;
        let mut stmt = conn.statement(&statement).build()?;
        stmt.bind("name", &file_name)?;
        stmt.bind("mime_type", &part.content_type.as_str())?;
        stmt.bind("doc_size", &(part.content.len() as i64))?;
        stmt.bind("content_type", &part.content_type.as_str())?;
        stmt.bind("lob", &content)?;
        stmt.bind("item_id", &part.field_name.as_str())?;
        stmt.bind("application_id", &form_value("p_flow_id"))?;
        stmt.bind("page_id", &form_value("p_flow_step_id"))?;
        stmt.bind("session_id", &form_value("p_instance"))?;
        stmt.bind("request", &form_value("p_request"))?;
        stmt.bind("ret_name", &OracleType::Varchar2(4000))?;
        stmt.bind("sqlerrcode", &0i64)?;
        stmt.bind("sqlerrm", &OracleType::Varchar2(32767))?;
        stmt.bind("sqlerrtrace", &OracleType::Varchar2(32767))?;
        stmt.execute(&[])?;

        check_wrapper_error(&stmt)?;

        let ret = stmt
            .bind_value::<_, Option<String>>("ret_name")?
            .unwrap_or_default();
        self.shared
            .set_step_info(STEP_SAVE_FILE, &statement, &statement, true);
        Ok(ret)
    }

    fn dump_error(&self, work: &Work, err: &Error) {
        let (statement, echo) = self.shared.last_statements();
        let error_text = match err.ora_trace() {
            Some(trace) => format!("{}\n{}", err, trace),
            None => err.to_string(),
        };
        write_dump(
            &work.dump_file_name,
            &work.user_name,
            &work.conn_str,
            &statement,
            &error_text,
            &echo,
        );
    }
}

impl Tasker for OracleTasker {
    fn run(&mut self, work: &Work) -> TaskResult {
        self.init_log(work);
        let began = Instant::now();
        let mut res = TaskResult::default();

        let outcome = self
            .connect(&work.user_name, &work.user_pass, &work.conn_str)
            .and_then(|_| {
                let mut inner = TaskResult::default();
                let r = self.call_procedure(&mut inner, work);
                res = inner;
                r
            });

        match outcome {
            Ok(()) => {
                res.status = http::StatusCode::OK.as_u16();
            }
            Err(err) => {
                let (status, content, _) = pack_error(&err);
                res.status = status;
                res.content = content;
                // dump before closing so the last statement survives
                self.dump_error(work, &err);
                self.disconnect();
                self.shared.lock().errors_num += 1;
            }
        }
        res.duration_secs = began.elapsed().as_secs() as i64;

        let mut st = self.shared.lock();
        st.is_working = false;
        st.last_finish = Some(Instant::now());
        res
    }

    fn close_and_free(&mut self) {
        self.disconnect();
        let mut st = self.shared.lock();
        st.steps.clear();
        st.log_session_key.clear();
        st.log_task_id.clear();
        st.log_user.clear();
        st.log_conn_str.clear();
        st.log_proc.clear();
    }

    fn control(&self) -> Arc<dyn TaskerControl> {
        self.shared.clone()
    }
}

fn check_wrapper_error(stmt: &oracle::Statement) -> Result<()> {
    let code: i64 = stmt.bind_value("sqlerrcode")?;
    if code == 0 {
        return Ok(());
    }
    let message = stmt
        .bind_value::<_, Option<String>>("sqlerrm")?
        .unwrap_or_default();
    let trace = stmt
        .bind_value::<_, Option<String>>("sqlerrtrace")?
        .unwrap_or_default();
    Err(Error::Ora {
        code: code as i32,
        message,
        trace,
    })
}

fn kill_session(stm: &str, user: &str, pass: &str, conn_str: &str, sess_id: &str) -> Result<()> {
    let conn = oracle::Connection::connect(user, pass, conn_str)?;
    let result = (|| -> Result<()> {
        let mut stmt = conn.statement(stm).build()?;
        stmt.bind("sess_id", &sess_id)?;
        stmt.bind("ret", &0i64)?;
        stmt.bind("out_err_msg", &OracleType::Varchar2(32767))?;
        stmt.execute(&[])?;
        let ret: i64 = stmt.bind_value("ret")?;
        if ret != 1 {
            let msg = stmt
                .bind_value::<_, Option<String>>("out_err_msg")?
                .unwrap_or_default();
            return Err(Error::Internal(msg));
        }
        Ok(())
    })();
    if let Err(err) = conn.close() {
        tracing::debug!("kill-session connection close reported: {}", err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::otasker::flavor::FlavorKind;

    fn tasker() -> OracleTasker {
        OracleTasker::new(
            Flavor::for_kind(FlavorKind::Classic),
            Arc::new(DescriptorCache::new(Arc::new(Metrics::new()))),
        )
    }

    #[test]
    fn interrupt_is_a_noop_when_idle() {
        let t = tasker();
        let control = t.control();
        assert!(control.interrupt().is_ok());
    }

    #[test]
    fn step_log_keeps_at_most_one_open_step() {
        let t = tasker();
        t.shared.open_step(STEP_CONNECT, "connect");
        t.shared.close_step(STEP_CONNECT);
        t.shared.open_step(STEP_RUN, "run");
        let stat = t.control().stat("Created");
        assert_eq!(stat.step_name, "004 - run");
        let open = stat
            .last_steps
            .iter()
            .filter(|s| s.name == "004 - run")
            .count();
        assert_eq!(open, 1);
    }

    #[test]
    fn last_statements_come_from_the_highest_step() {
        let t = tasker();
        t.shared.open_step(STEP_CONNECT, "connect");
        t.shared.set_step_info(STEP_CONNECT, "connect", "connect", true);
        t.shared.open_step(STEP_RUN, "run");
        t.shared.set_step_info(STEP_RUN, "begin null; end;", "echo", false);
        let (stm, echo) = t.shared.last_statements();
        assert_eq!(stm, "begin null; end;");
        assert_eq!(echo, "echo");
    }

    #[test]
    fn stat_reports_idle_worker() {
        let t = tasker();
        let stat = t.control().stat("UserName");
        assert!(!stat.now_in_process);
        assert_eq!(stat.request_proceeded, 0);
        assert_eq!(stat.idle_time_ms, 0);
    }
}
