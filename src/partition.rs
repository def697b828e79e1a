//! Db2 range-partition management.
//!
//! Thin SQL builders over ALTER TABLE ... PARTITION and the
//! `syscat.datapartitions` catalog, dispatched through the facade. Every
//! operation requires a Db2 client.

use crate::db::Db;
use crate::result::DbResult;
use crate::types::{BackendType, DbValue};

impl Db<'_> {
    fn require_db2(&self, operation: &str) -> Option<DbResult> {
        if self.backend() == BackendType::Db2 {
            None
        } else {
            Some(DbResult::failed(format!(
                "{operation} requires a Db2 backend, not {}",
                self.backend()
            )))
        }
    }

    /// `ALTER TABLE ... ADD PARTITION <name> <boundary> [IN tbs] [INDEX IN tbs]`.
    pub fn add_partition(
        &mut self,
        table: &str,
        partition_name: &str,
        boundary: &str,
        in_tablespace: Option<&str>,
        index_tablespace: Option<&str>,
    ) -> DbResult {
        if let Some(failed) = self.require_db2("add_partition") {
            return failed;
        }
        let mut sql = format!("ALTER TABLE {table} ADD PARTITION {partition_name} {boundary}");
        if let Some(tbs) = in_tablespace {
            sql.push_str(&format!(" IN {tbs}"));
        }
        if let Some(tbs) = index_tablespace {
            sql.push_str(&format!(" INDEX IN {tbs}"));
        }
        self.execute(&sql, ())
    }

    /// Attach a staged table as a new partition.
    pub fn attach_partition(
        &mut self,
        table: &str,
        partition_name: &str,
        boundary: &str,
        from_table: &str,
        index_option: Option<&str>,
    ) -> DbResult {
        if let Some(failed) = self.require_db2("attach_partition") {
            return failed;
        }
        let mut sql = format!(
            "ALTER TABLE {table} ATTACH PARTITION {partition_name} {boundary} FROM {from_table}"
        );
        if let Some(option) = index_option {
            sql.push_str(&format!(" {option}"));
        }
        self.execute(&sql, ())
    }

    /// Detach a partition into a standalone target table.
    pub fn detach_partition(
        &mut self,
        table: &str,
        partition_name: &str,
        target_table: &str,
    ) -> DbResult {
        if let Some(failed) = self.require_db2("detach_partition") {
            return failed;
        }
        let sql = format!(
            "ALTER TABLE {table} DETACH PARTITION {partition_name} INTO {target_table}"
        );
        self.execute(&sql, ())
    }

    /// Probe partition status from `syscat.datapartitions`. `status = 0`
    /// for exactly one match, `1` for none or several, `-1` on error.
    pub fn check_partition(
        &mut self,
        schema: &str,
        table: &str,
        partition_name: Option<&str>,
    ) -> DbResult {
        if let Some(failed) = self.require_db2("check_partition") {
            return failed;
        }
        let mut sql = format!(
            "SELECT status, access_mode FROM syscat.datapartitions \
             WHERE tabschema = '{schema}' AND tabname = '{table}'"
        );
        if let Some(name) = partition_name {
            sql.push_str(&format!(" AND datapartitionname = '{name}'"));
        }
        let result = self.query(&sql, ());
        if !result.is_ok() {
            return result;
        }
        match result.data.len() {
            1 => {
                let message = format!(
                    "Got {schema}.{table} partition status: {:?}",
                    result.data[0].get("status").or_else(|| result.data[0].get("STATUS"))
                );
                tracing::info!("{message}");
                DbResult { message, ..result }
            }
            0 => {
                let message = format!("No partition found for {schema}.{table}");
                tracing::warn!("{message}");
                DbResult {
                    status: 1,
                    message,
                    ..result
                }
            }
            _ => {
                let message = format!("Multiple partitions found for {schema}.{table}");
                tracing::warn!("{message}");
                DbResult {
                    status: 1,
                    message,
                    ..result
                }
            }
        }
    }

    /// Drop a fully detached partition table. Refuses while the detach is
    /// still finalizing (status not empty or access mode not `F`).
    pub fn drop_detached_partition(&mut self, schema: &str, table: &str) -> DbResult {
        if let Some(failed) = self.require_db2("drop_detached_partition") {
            return failed;
        }
        let probe = self.check_partition(schema, table, None);
        if probe.status != 0 {
            return probe;
        }
        let row = &probe.data[0];
        let field = |name: &str| -> String {
            row.get(name)
                .or_else(|| row.get(&name.to_ascii_uppercase()))
                .and_then(|v| match v {
                    DbValue::Text(s) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default()
        };
        let status = field("status");
        let access_mode = field("access_mode");
        if status.trim().is_empty() && access_mode == "F" {
            self.execute(&format!("DROP TABLE {schema}.{table}"), ())
        } else {
            let message = format!(
                "Partition status of {schema}.{table} is '{status}', access mode '{access_mode}'; \
                 it cannot be dropped."
            );
            tracing::warn!("{message}");
            DbResult {
                status: 1,
                message,
                data: Vec::new(),
                columns: Vec::new(),
                count: 0,
            }
        }
    }

    /// Refresh statistics; defaults to 10% sampling with write access
    /// allowed, or runs `custom_cmd` verbatim.
    pub fn runstats(&mut self, table: &str, custom_cmd: Option<&str>) -> DbResult {
        if let Some(failed) = self.require_db2("runstats") {
            return failed;
        }
        let sql = match custom_cmd {
            Some(cmd) => cmd.to_string(),
            None => format!(
                "CALL SYSPROC.ADMIN_CMD('RUNSTATS ON TABLE {table} WITH DISTRIBUTION AND \
                 INDEXES ALL ALLOW WRITE ACCESS TABLESAMPLE SYSTEM(10) INDEXSAMPLE SYSTEM(10)')"
            ),
        };
        self.execute(&sql, ())
    }
}
