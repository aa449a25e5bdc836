//! Parameter binding for the generated wrapper block.
//!
//! Every HTTP parameter is rendered twice: once in the *execution* form the
//! database actually runs (scalar values as named binds, array values as
//! literal index assignments on locally declared PL/SQL variables) and once
//! in the *echo* form used for error dumps and the sessions page, where every
//! value appears inline as a literal.

use chrono::DateTime;

use crate::error::{Error, Result};
use crate::otasker::textutil::{quote_literal, remove_cr, trim_right_crlf};

/// Argument type codes, part of the database contract (`all_arguments`
/// classification performed by the describe probe).
pub const TYPE_UNKNOWN: i32 = 0;
pub const TYPE_STRING: i32 = 1;
pub const TYPE_NUMBER: i32 = 2;
pub const TYPE_DATE: i32 = 3;
pub const TYPE_BOOLEAN: i32 = 4;
pub const TYPE_INTEGER: i32 = 5;
pub const TYPE_STRING_TAB: i32 = 11;
pub const TYPE_NUMBER_TAB: i32 = 12;
pub const TYPE_DATE_TAB: i32 = 13;
pub const TYPE_BOOLEAN_TAB: i32 = 14;
pub const TYPE_INTEGER_TAB: i32 = 15;

/// Accumulated fragments of the wrapper block, execution and echo forms side
/// by side, plus the scalar bind list for execution.
#[derive(Debug, Default)]
pub struct WrapperParts {
    pub exec_declare: String,
    pub show_declare: String,
    pub exec_set: String,
    pub show_set: String,
    pub exec_args: String,
    pub show_args: String,
    pub exec_store: String,
    pub show_store: String,
    /// Named scalar binds `(name, value)`; all parameter values travel as
    /// strings and convert implicitly under the session's NLS settings.
    pub binds: Vec<(String, String)>,
}

impl WrapperParts {
    fn push_arg(&mut self, exec: &str, show: &str) {
        if !self.exec_args.is_empty() {
            self.exec_args.push_str(", ");
        }
        self.exec_args.push_str(exec);
        if !self.show_args.is_empty() {
            self.show_args.push_str(", ");
        }
        self.show_args.push_str(show);
    }

    fn push_set_both(&mut self, line: &str) {
        self.exec_set.push_str(line);
        self.show_set.push_str(line);
    }

    fn push_store_both(&mut self, line: &str) {
        self.exec_store.push_str(line);
        self.show_store.push_str(line);
    }
}

/// Render the CGI environment into both forms as literal index assignments.
///
/// Iteration order is the caller's (sorted) order; indexes are 1-based as
/// PL/SQL expects.
pub fn push_cgi_env<'a, I>(parts: &mut WrapperParts, env: I, count: usize)
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    parts.push_set_both(&format!("  l_num_params := {};\n", count));
    for (i, (key, val)) in env.into_iter().enumerate() {
        parts.push_set_both(&format!(
            "  l_param_name({}) := '{}';\n",
            i + 1,
            quote_literal(key)
        ));
        parts.push_set_both(&format!(
            "  l_param_val({}) := '{}';\n",
            i + 1,
            quote_literal(val)
        ));
    }
}

/// Render the external-parameter arrays (full name/value list in insertion
/// order, names upper-cased).
pub fn push_ext_params(parts: &mut WrapperParts, ext: &[(String, String)]) {
    parts.push_set_both(&format!("  l_num_ext_params := {};\n", ext.len()));
    for (i, (name, _)) in ext.iter().enumerate() {
        parts.push_set_both(&format!(
            "  l_ext_param_name({}) := '{}';\n",
            i + 1,
            quote_literal(&name.to_uppercase())
        ));
    }
    for (i, (_, val)) in ext.iter().enumerate() {
        parts.push_set_both(&format!(
            "  l_ext_param_val({}) := '{}';\n",
            i + 1,
            quote_literal(val)
        ));
    }
}

/// Render the owning package name (empty means standalone → null).
pub fn push_package_name(parts: &mut WrapperParts, package: &str) {
    if package.is_empty() {
        parts.push_set_both("  l_package_name := null;\n");
    } else {
        parts.push_set_both(&format!(
            "  l_package_name := '{}';\n",
            quote_literal(package)
        ));
    }
}

/// Bind one named parameter according to its descriptor type.
///
/// `store_proc`, when configured for the route, additionally receives every
/// value so the server-side parameter context stays populated.
pub fn prepare_param(
    parts: &mut WrapperParts,
    name: &str,
    values: &[String],
    type_code: i32,
    type_name: &str,
    store_proc: &str,
) -> Result<()> {
    let first = values.first().map(String::as_str).unwrap_or_default();
    match type_code {
        TYPE_STRING => {
            let value = remove_cr(first);
            prepare_string(parts, name, &value, type_name, store_proc);
            Ok(())
        }
        TYPE_NUMBER | TYPE_INTEGER => {
            let value = fix_decimal_prefix(trim_right_crlf(first));
            parts.binds.push((name.to_string(), value.clone()));
            parts
                .show_declare
                .push_str(&format!("  l_{} {};\n", name, type_name));
            parts
                .show_set
                .push_str(&format!("  l_{} := {};\n", name, value));
            parts.push_arg(
                &format!("{} => :{}", name, name),
                &format!("{} => l_{}", name, name),
            );
            push_scalar_store(parts, name, &value, store_proc);
            Ok(())
        }
        TYPE_DATE => {
            let value = trim_right_crlf(first).to_string();
            parts.binds.push((name.to_string(), value.clone()));
            parts
                .show_declare
                .push_str(&format!("  l_{} {};\n", name, type_name));
            parts
                .show_set
                .push_str(&format!("  l_{} := to_date('{}');\n", name, quote_literal(&value)));
            parts.push_arg(
                &format!("{} => :{}", name, name),
                &format!("{} => l_{}", name, name),
            );
            push_scalar_store(parts, name, &value, store_proc);
            Ok(())
        }
        TYPE_BOOLEAN => {
            let value = trim_right_crlf(first).to_lowercase();
            parts.binds.push((name.to_string(), value.clone()));
            parts
                .show_declare
                .push_str(&format!("  l_{} {};\n", name, type_name));
            parts
                .show_set
                .push_str(&format!("  l_{} := {};\n", name, value));
            parts.push_arg(
                &format!("{} => :{} = 'true'", name, name),
                &format!("{} => l_{}", name, name),
            );
            if !store_proc.is_empty() {
                parts.push_store_both(&format!(
                    "  {}('{}', '{}');\n",
                    store_proc,
                    name.to_uppercase(),
                    quote_literal(&value)
                ));
            }
            Ok(())
        }
        TYPE_STRING_TAB | TYPE_NUMBER_TAB | TYPE_INTEGER_TAB | TYPE_DATE_TAB => {
            prepare_table(parts, name, values, type_code, type_name, store_proc)
        }
        TYPE_BOOLEAN_TAB => Err(Error::Internal(format!(
            "unsupported table element type for parameter \"{}\"",
            name
        ))),
        _ => {
            // Extraneous form fields: never passed to the procedure, but still
            // stored to the parameter context when a store procedure exists.
            let value = trim_right_crlf(first).to_string();
            parts
                .show_declare
                .push_str(&format!("  l_{} varchar2(32767);\n", name));
            parts
                .show_set
                .push_str(&format!("  l_{} := '{}';\n", name, quote_literal(&value)));
            push_scalar_store(parts, name, &value, store_proc);
            Ok(())
        }
    }
}

/// String parameters keep their own entry point: the resource shape binds
/// `amodule`/`amethod`/`aurl` this way without a descriptor lookup.
pub fn prepare_string(
    parts: &mut WrapperParts,
    name: &str,
    value: &str,
    type_name: &str,
    store_proc: &str,
) {
    parts.binds.push((name.to_string(), value.to_string()));
    // floor of 1 to avoid a varchar2(0) declaration
    let len = value.len().max(1);
    parts
        .show_declare
        .push_str(&format!("  l_{} {}({});\n", name, type_name, len));
    parts
        .show_set
        .push_str(&format!("  l_{} := '{}';\n", name, quote_literal(value)));
    parts.push_arg(
        &format!("{} => :{}", name, name),
        &format!("{} => l_{}", name, name),
    );
    push_scalar_store(parts, name, value, store_proc);
}

fn push_scalar_store(parts: &mut WrapperParts, name: &str, value: &str, store_proc: &str) {
    if store_proc.is_empty() {
        return;
    }
    parts.binds.push((format!("{}#", name), value.to_string()));
    parts.exec_store.push_str(&format!(
        "  {}('{}', :{}#);\n",
        store_proc,
        name.to_uppercase(),
        name
    ));
    parts.show_store.push_str(&format!(
        "  {}('{}', l_{});\n",
        store_proc,
        name.to_uppercase(),
        name
    ));
}

fn prepare_table(
    parts: &mut WrapperParts,
    name: &str,
    values: &[String],
    type_code: i32,
    type_name: &str,
    store_proc: &str,
) -> Result<()> {
    // tables live as declared locals in both forms
    let decl = format!("  l_{} {};\n", name, type_name);
    parts.exec_declare.push_str(&decl);
    parts.show_declare.push_str(&decl);

    for (i, raw) in values.iter().enumerate() {
        let line = match type_code {
            TYPE_STRING_TAB => {
                let val = remove_cr(raw);
                format!("  l_{}({}) := '{}';\n", name, i + 1, quote_literal(&val))
            }
            TYPE_NUMBER_TAB | TYPE_INTEGER_TAB => {
                let val = fix_decimal_prefix(&remove_cr(trim_right_crlf(raw)));
                format!(
                    "  l_{}({}) := to_number('{}');\n",
                    name,
                    i + 1,
                    quote_literal(&val)
                )
            }
            TYPE_DATE_TAB => {
                let val = remove_cr(trim_right_crlf(raw));
                match DateTime::parse_from_rfc3339(&val) {
                    Ok(dt) => format!(
                        "  l_{}({}) := to_date('{}','YYYY-MM-DD HH24:MI:SS');\n",
                        name,
                        i + 1,
                        dt.naive_local().format("%Y-%m-%d %H:%M:%S")
                    ),
                    Err(_) => format!(
                        "  l_{}({}) := to_date('{}');\n",
                        name,
                        i + 1,
                        quote_literal(&val)
                    ),
                }
            }
            _ => unreachable!("caller filters table type codes"),
        };
        parts.push_set_both(&line);
    }

    parts.push_arg(
        &format!("{} => l_{}", name, name),
        &format!("{} => l_{}", name, name),
    );

    if !store_proc.is_empty() {
        for i in 0..values.len() {
            parts.push_store_both(&format!(
                "  {}('{}', l_{}({}));\n",
                store_proc,
                name.to_uppercase(),
                name,
                i + 1
            ));
        }
    }
    Ok(())
}

/// Values starting with a bare decimal separator get a leading zero so the
/// database-side conversion never sees `,5` or `.5`.
fn fix_decimal_prefix(value: &str) -> String {
    if value.starts_with(',') || value.starts_with('.') {
        format!("0{}", value)
    } else {
        value.to_string()
    }
}
