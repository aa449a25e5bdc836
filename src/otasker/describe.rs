//! Procedure descriptor cache.
//!
//! Maps `(database, procedure)` to the owning package, the last-known DDL
//! timestamp and the typed argument map. `describe` always runs a short probe
//! against the database (resolving the name, forcing recompilation of invalid
//! objects, and detecting DDL changes); only a detected change pays for the
//! long probe that refetches the full argument list.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// One argument of a described procedure.
#[derive(Debug, Clone)]
pub struct Argument {
    pub data_type: i32,
    pub type_name: String,
}

#[derive(Debug)]
struct Procedure {
    timestamp: NaiveDateTime,
    package: String,
    arguments: HashMap<String, Argument>,
}

/// Process-wide cache of procedure descriptors.
///
/// Lookups take the shared lock; a refresh takes the exclusive lock only for
/// the final swap. Probes run on the caller's connection without holding any
/// cache lock. Lock acquisition waits are published to the metrics registry.
pub struct DescriptorCache {
    inner: RwLock<HashMap<String, Procedure>>,
    metrics: Arc<Metrics>,
}

fn cache_key(db_name: &str, procedure: &str) -> String {
    format!("{}.{}", db_name, procedure).to_uppercase()
}

impl DescriptorCache {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Last-known DDL timestamp and package name for a procedure.
    pub fn procedure_info(&self, db_name: &str, procedure: &str) -> Result<(NaiveDateTime, String)> {
        let bg = Instant::now();
        let map = self.inner.read().expect("descriptor cache poisoned");
        self.metrics.describe_rlock_wait(bg.elapsed());
        match map.get(&cache_key(db_name, procedure)) {
            Some(p) => Ok((p.timestamp, p.package.clone())),
            None => Err(Error::DescriptorMissing(procedure.to_string())),
        }
    }

    /// Type code and display name of one argument.
    pub fn argument_info(
        &self,
        db_name: &str,
        procedure: &str,
        argument: &str,
    ) -> Result<(i32, String)> {
        let bg = Instant::now();
        let map = self.inner.read().expect("descriptor cache poisoned");
        self.metrics.describe_rlock_wait(bg.elapsed());
        let p = map
            .get(&cache_key(db_name, procedure))
            .ok_or_else(|| Error::DescriptorMissing(procedure.to_string()))?;
        match p.arguments.get(&argument.to_uppercase()) {
            Some(a) => Ok((a.data_type, a.type_name.clone())),
            None => Err(Error::DescriptorMissing(format!(
                "{}.{}",
                procedure, argument
            ))),
        }
    }

    /// Ensure the descriptor for a procedure is up to date.
    pub fn describe(
        &self,
        conn: &oracle::Connection,
        db_name: &str,
        procedure: &str,
    ) -> Result<()> {
        let total_bg = Instant::now();
        let res = self.describe_inner(conn, db_name, procedure);
        self.metrics.describe_total(total_bg.elapsed());
        res
    }

    fn describe_inner(
        &self,
        conn: &oracle::Connection,
        db_name: &str,
        procedure: &str,
    ) -> Result<()> {
        let known_ts = self
            .procedure_info(db_name, procedure)
            .map(|(ts, _)| ts)
            .unwrap_or_else(|_| epoch());

        let probe = short_probe(conn, procedure, known_ts)?;
        if !probe.updated {
            return Ok(());
        }

        let arguments = long_probe(conn, probe.object_id, &probe.parsed_name)?;

        let bg = Instant::now();
        let mut map = self.inner.write().expect("descriptor cache poisoned");
        self.metrics.describe_lock_wait(bg.elapsed());
        map.insert(
            cache_key(db_name, procedure),
            Procedure {
                timestamp: probe.timestamp,
                package: probe.package.clone(),
                arguments,
            },
        );
        Ok(())
    }

    #[cfg(test)]
    fn install(
        &self,
        db_name: &str,
        procedure: &str,
        timestamp: NaiveDateTime,
        package: &str,
        args: Vec<(&str, i32, &str)>,
    ) {
        let mut map = self.inner.write().unwrap();
        map.insert(
            cache_key(db_name, procedure),
            Procedure {
                timestamp,
                package: package.to_string(),
                arguments: args
                    .into_iter()
                    .map(|(n, t, tn)| {
                        (
                            n.to_uppercase(),
                            Argument {
                                data_type: t,
                                type_name: tn.to_string(),
                            },
                        )
                    })
                    .collect(),
            },
        );
    }
}

fn epoch() -> NaiveDateTime {
    chrono::DateTime::from_timestamp(0, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

struct ShortProbe {
    updated: bool,
    timestamp: NaiveDateTime,
    parsed_name: String,
    object_id: i64,
    package: String,
}

fn short_probe(
    conn: &oracle::Connection,
    procedure: &str,
    known_ts: NaiveDateTime,
) -> Result<ShortProbe> {
    let mut stmt = conn.statement(&STM_DESCR_SHORT).build()?;
    stmt.bind("proc_name", &procedure)?;
    stmt.bind("package_name", &oracle::sql_type::OracleType::Varchar2(128))?;
    stmt.bind("procedure_name", &oracle::sql_type::OracleType::Varchar2(128))?;
    stmt.bind("object_id", &0i64)?;
    stmt.bind("last_ddl_time", &known_ts)?;
    stmt.bind("updated", &0i64)?;
    stmt.bind("len_", &0i64)?;
    stmt.execute(&[])?;

    let updated: i64 = stmt.bind_value("updated")?;
    Ok(ShortProbe {
        updated: updated == 1,
        timestamp: stmt.bind_value("last_ddl_time")?,
        parsed_name: stmt
            .bind_value::<_, Option<String>>("procedure_name")?
            .unwrap_or_default(),
        object_id: stmt.bind_value("object_id")?,
        package: stmt
            .bind_value::<_, Option<String>>("package_name")?
            .unwrap_or_default(),
    })
}

fn long_probe(
    conn: &oracle::Connection,
    object_id: i64,
    parsed_name: &str,
) -> Result<HashMap<String, Argument>> {
    let rows = conn.query(&STM_DESCR_LONG, &[&object_id, &parsed_name])?;
    let mut arguments = HashMap::new();
    for row in rows {
        let row = row?;
        let name: String = row.get(0)?;
        let data_type: i32 = row.get(1)?;
        let type_name: String = row.get(2)?;
        arguments.insert(
            name,
            Argument {
                data_type,
                type_name,
            },
        );
    }
    Ok(arguments)
}

const STM_DESCR_ARGS: &str = r#"
from
    all_arguments a
    ,all_arguments sa
  where a.data_level = 0
  and a.argument_name is not null
  and sa.OBJECT_ID(+) = a.OBJECT_ID
  and sa.SUBPROGRAM_ID(+) = a.SUBPROGRAM_ID
  and sa.DATA_LEVEL(+) = a.DATA_LEVEL + 1
  and sa.SEQUENCE(+) = a.SEQUENCE + 1
  and
    (
      a.pls_type in ('CHAR', 'DATE', 'FLOAT', 'NUMBER', 'VARCHAR2', 'STRING', 'BOOLEAN', 'INTEGER', 'PLS_INTEGER', 'DECIMAL')
      or
      (
        a.DATA_TYPE = 'PL/SQL TABLE'
        and
        sa.pls_type in ('CHAR', 'DATE', 'FLOAT', 'NUMBER', 'VARCHAR2', 'STRING', 'BOOLEAN', 'INTEGER', 'PLS_INTEGER', 'DECIMAL')
      )
    )"#;

/// The short probe: resolve the name, force recompilation of invalid objects,
/// and report whether the last-DDL time moved past the cached one.
static STM_DESCR_SHORT: std::sync::LazyLock<String> = std::sync::LazyLock::new(|| {
    format!(
        r#"declare
  lstatus varchar2(40);
  lschema VARCHAR2(40);
  lpart1 VARCHAR2(40);
  lpart2 VARCHAR2(40);
  ldblink VARCHAR2(40);
  lpart1_type NUMBER;
  lobject_type VARCHAR2(40);
  llast_ddl_time date;
  ex1 exception;
  pragma exception_init(ex1, -06564);
begin
  DBMS_UTILITY.NAME_RESOLVE(:proc_name,1,lschema,lpart1,lpart2,ldblink,lpart1_type,:object_id);
  if lpart1_type = 9 then
    :package_name := lschema || '.' || lpart1;
  else
    :package_name := null;
  end if;

  select status, object_type, last_ddl_time
  into lstatus, lobject_type, llast_ddl_time
  from all_objects
  where all_objects.object_id = :object_id;
  if lstatus = 'INVALID' then
    dbms_ddl.alter_compile(lobject_type, lschema, nvl(lpart1, lpart2));
    llast_ddl_time := sysdate;
  end if;
  if llast_ddl_time <= :last_ddl_time then
    :updated := 0;
    :len_ := 0;
  else
    :updated := 1;
    :last_ddl_time := llast_ddl_time;
    :procedure_name := lpart2;

    select count(*)
    into :len_{args}
    and a.object_id = :object_id
    and a.object_name = lpart2;
  end if;
  commit;
exception
  when others then
    rollback;
    if sqlcode in (-20000, -20001, -20002, -20003, -20004) then
      raise ex1;
    else
      raise;
    end if;
end;"#,
        args = STM_DESCR_ARGS
    )
});

/// The long probe: the full argument list with type classification.
static STM_DESCR_LONG: std::sync::LazyLock<String> = std::sync::LazyLock::new(|| {
    format!(
        r#"select
          a.ARGUMENT_NAME name,
          case
            when a.pls_type in ('CHAR', 'VARCHAR2', 'STRING') then 1
            when a.pls_type in ('FLOAT', 'NUMBER', 'DECIMAL') then 2
            when a.pls_type in ('DATE') then 3
            when a.pls_type in ('BOOLEAN') then 4
            when a.pls_type in ('INTEGER', 'PLS_INTEGER') then 5
            when a.DATA_TYPE = 'PL/SQL TABLE' then
              case
                when sa.pls_type in ('CHAR', 'VARCHAR2', 'STRING') then 11
                when sa.pls_type in ('FLOAT', 'NUMBER', 'DECIMAL') then 12
                when sa.pls_type in ('DATE') then 13
                when sa.pls_type in ('BOOLEAN') then 14
                when sa.pls_type in ('INTEGER', 'PLS_INTEGER') then 15
                else 0
              end
            else 0
          end data_type,
          case
            when a.type_name is not null then a.type_owner||'.'||a.type_name||decode(a.type_subname, null, '', '.'||a.type_subname)
            else a.pls_type
          end data_type_name{args}
        and a.object_id = :1
        and a.object_name = :2"#,
        args = STM_DESCR_ARGS
    )
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otasker::bind;

    fn cache() -> DescriptorCache {
        DescriptorCache::new(Arc::new(Metrics::new()))
    }

    fn ts(secs: i64) -> NaiveDateTime {
        chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc()
    }

    #[test]
    fn lookup_misses_report_descriptor_missing() {
        let c = cache();
        assert!(c.procedure_info("DB", "proc").is_err());
        assert!(c.argument_info("DB", "proc", "ap").is_err());
    }

    #[test]
    fn keys_are_case_insensitive() {
        let c = cache();
        c.install("db", "Test_P", ts(100), "A.PKG", vec![("ap", bind::TYPE_STRING, "varchar2")]);
        let (stamp, pkg) = c.procedure_info("DB", "test_p").unwrap();
        assert_eq!(stamp, ts(100));
        assert_eq!(pkg, "A.PKG");
        let (code, name) = c.argument_info("DB", "TEST_P", "AP").unwrap();
        assert_eq!(code, bind::TYPE_STRING);
        assert_eq!(name, "varchar2");
    }

    #[test]
    fn unknown_argument_is_missing_even_when_procedure_exists() {
        let c = cache();
        c.install("db", "p", ts(1), "", vec![]);
        assert!(c.argument_info("db", "p", "nope").is_err());
    }

    #[test]
    fn reinstall_replaces_argument_map_atomically() {
        let c = cache();
        c.install("db", "p", ts(1), "", vec![("a", bind::TYPE_STRING, "varchar2")]);
        c.install("db", "p", ts(2), "", vec![("b", bind::TYPE_NUMBER, "number")]);
        assert!(c.argument_info("db", "p", "a").is_err());
        assert_eq!(c.argument_info("db", "p", "b").unwrap().0, bind::TYPE_NUMBER);
        assert_eq!(c.procedure_info("db", "p").unwrap().0, ts(2));
    }

    #[test]
    fn probe_statements_are_well_formed() {
        assert!(STM_DESCR_SHORT.contains("DBMS_UTILITY.NAME_RESOLVE"));
        assert!(STM_DESCR_SHORT.contains(":last_ddl_time"));
        assert!(STM_DESCR_LONG.contains("all_arguments"));
        assert!(!STM_DESCR_LONG.contains("{args}"));
    }
}
