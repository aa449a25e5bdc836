//! Interstitial page templates.
//!
//! Each procedure-gateway route carries its own template dictionary straight
//! from configuration; `sessions` is built in. Bodies are Tera templates
//! parsed at render time, matching their per-request lifecycle in the
//! configuration blob. Values rendered unescaped (the resubmission form)
//! must be marked `| safe` by the template author.

use std::collections::HashMap;

use crate::config::TemplateEntry;
use crate::error::Result;

/// The built-in sessions introspection page.
const SESSIONS_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>Virtual path sessions</title>
<meta http-equiv="Expires" content="0"/>
<style>
  table { border: 1px solid black; border-collapse: collapse; }
  th { text-align: center; font-weight: bold; background: #ccc; padding: 2px; border: 1px solid black; }
  td { padding: 2px; border: 1px solid black; font-family: Arial; font-size: 10pt; }
</style>
</head>
<body>
  <h3>Virtual path sessions</h3>
  <table>
    <thead>
      <tr>
        <th>#</th>
        <th><a href="!?Sort=Created">Created</a></th>
        <th><a href="!?Sort=UserName">User</a></th>
        <th><a href="!?Sort=SessionID">Session</a></th>
        <th><a href="!?Sort=Database">Database</a></th>
        <th><a href="!?Sort=MessageID">Message</a></th>
        <th><a href="!?Sort=NowInProcess">State</a></th>
        <th><a href="!?Sort=IdleTime">Idle, ms</a></th>
        <th><a href="!?Sort=LastDuration">Last duration, ms</a></th>
        <th><a href="!?Sort=RequestProceeded">Requests</a></th>
        <th><a href="!?Sort=ErrorsNumber">Errors</a></th>
      </tr>
    </thead>
{% for s in Sessions %}
    <tr style="background-color: {% if s.now_in_process %}#00FF00{% else %}white{% endif %};">
      <td align="center">{{ loop.index }}</td>
      <td align="center" nowrap>{{ s.created }}</td>
      <td align="center">{{ s.user_name }}</td>
      <td align="center" nowrap>{{ s.session_id }}</td>
      <td align="center" nowrap>{{ s.database }}</td>
      <td align="center" nowrap>{{ s.message_id }}</td>
      <td align="center">{% if s.now_in_process %}running: {{ s.step_name }}{% else %}idle{% endif %}</td>
      <td align="right">{{ s.idle_time_ms }}</td>
      <td align="right">{{ s.last_duration_ms }}</td>
      <td align="right">{{ s.request_proceeded }}</td>
      <td align="right">{{ s.errors_number }}</td>
    </tr>
{% for step in s.last_steps %}
    <tr>
      <td></td>
      <td nowrap>{{ step.name }}</td>
      <td align="right">{{ step.duration_ms }} ms</td>
      <td colspan="8"><pre><code class="sql">{{ step.statement }}</code></pre></td>
    </tr>
{% endfor %}
{% endfor %}
  </table>
</body>
</html>
"#;

/// One route's template dictionary.
#[derive(Debug, Clone, Default)]
pub struct PageSet {
    templates: HashMap<String, String>,
}

impl PageSet {
    pub fn new(entries: &[TemplateEntry]) -> Self {
        let mut templates = HashMap::with_capacity(entries.len());
        for e in entries {
            templates.insert(e.code.clone(), e.body.clone());
        }
        Self { templates }
    }

    pub fn body(&self, name: &str) -> Option<&str> {
        if name == "sessions" {
            return Some(SESSIONS_TEMPLATE);
        }
        self.templates.get(name).map(String::as_str)
    }

    /// Render one page. A missing template is an error the caller maps to
    /// the `error` page (or a plain-text fallback).
    pub fn render(&self, name: &str, ctx: &tera::Context) -> Result<String> {
        let body = self
            .body(name)
            .ok_or_else(|| crate::error::Error::Internal(format!(
                "unable to find template for page \"{}\"",
                name
            )))?;
        Ok(tera::Tera::one_off(body, ctx, true)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otasker::TaskerStat;

    fn set(entries: &[(&str, &str)]) -> PageSet {
        PageSet::new(
            &entries
                .iter()
                .map(|(c, b)| TemplateEntry {
                    code: c.to_string(),
                    body: b.to_string(),
                })
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn renders_a_configured_template() {
        let pages = set(&[("error", "<p>{{ ErrMsg }}</p>")]);
        let mut ctx = tera::Context::new();
        ctx.insert("ErrMsg", "boom & bust");
        let html = pages.render("error", &ctx).unwrap();
        assert_eq!(html, "<p>boom &amp; bust</p>");
    }

    #[test]
    fn missing_template_is_an_error() {
        let pages = set(&[]);
        assert!(pages.render("rwait", &tera::Context::new()).is_err());
    }

    #[test]
    fn sessions_template_is_always_available() {
        let pages = set(&[]);
        let mut ctx = tera::Context::new();
        let mut s = TaskerStat::default();
        s.user_name = "scott".into();
        s.now_in_process = true;
        ctx.insert("Sessions", &vec![s]);
        let html = pages.render("sessions", &ctx).unwrap();
        assert!(html.contains("scott"));
        assert!(html.contains("running"));
    }

    #[test]
    fn safe_filter_renders_markup_unescaped() {
        let pages = set(&[("rwait", "{{ UserName }}: {{ Gmrf | safe }}")]);
        let mut ctx = tera::Context::new();
        ctx.insert("UserName", "u<1>");
        ctx.insert("Gmrf", "<form id=\"__gmrf__\"></form>");
        let html = pages.render("rwait", &ctx).unwrap();
        assert!(html.contains("u&lt;1&gt;"));
        assert!(html.contains("<form id=\"__gmrf__\"></form>"));
    }
}
