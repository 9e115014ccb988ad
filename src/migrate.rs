//! Migration files: a plan rendered into `NNNN_name.sql` with an up and a
//! down section, and an executor replaying pending files against a driver.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::{info, warn};

use crate::bookkeeping;
use crate::dialect::{Dialect, SchemaDriver};
use crate::diff::MigrationPlan;
use crate::util::{Error, Result};

pub const UP_MARKER: &str = "-- migrate:up";
pub const DOWN_MARKER: &str = "-- migrate:down";

fn migration_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})_.*\.sql$").expect("valid migration file pattern"))
}

/// Scans a directory for migration files matching pattern NNNN_*.sql
/// Returns the next available migration number (highest + 1, or 1 if none exist)
pub fn find_next_migration_number(dir: &Path) -> std::io::Result<u32> {
    let mut max_number = 0;
    for entry in std::fs::read_dir(dir)? {
        let filename = entry?.file_name();
        let filename = filename.to_string_lossy();
        if let Some(number) = migration_file_re()
            .captures(&filename)
            .and_then(|c| c[1].parse::<u32>().ok())
        {
            max_number = max_number.max(number);
        }
    }
    Ok(max_number + 1)
}

/// Generates migration filename like "0003_add_users.sql".
/// Lowercases, turns spaces and dashes into underscores and drops anything
/// else that is not alphanumeric.
pub fn generate_migration_filename(number: u32, name: &str) -> Result<String> {
    let sanitized: String = name
        .to_lowercase()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    let sanitized = sanitized
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if sanitized.is_empty() {
        return Err(Error::config(
            "Migration name must contain at least one alphanumeric character",
        ));
    }
    Ok(format!("{number:04}_{sanitized}.sql"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// File stem, also the name recorded in the migrations table.
    pub name: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl MigrationScript {
    pub fn from_plan(name: impl Into<String>, plan: &MigrationPlan, dialect: &dyn Dialect) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            up: plan.up_sql(dialect)?,
            down: plan.down_sql(dialect)?,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(UP_MARKER);
        out.push('\n');
        for statement in &self.up {
            out.push_str(statement);
            out.push_str(";\n");
        }
        out.push('\n');
        out.push_str(DOWN_MARKER);
        out.push('\n');
        for statement in &self.down {
            out.push_str(statement);
            out.push_str(";\n");
        }
        out
    }

    /// Statements end at a line whose last character is `;`. Lines before
    /// the first marker are ignored.
    pub fn parse(name: impl Into<String>, content: &str) -> Result<Self> {
        let name = name.into();
        #[derive(PartialEq)]
        enum Section {
            None,
            Up,
            Down,
        }

        let mut section = Section::None;
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut current = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed == UP_MARKER || trimmed == DOWN_MARKER {
                if !current.trim().is_empty() {
                    return Err(Error::Migration {
                        name,
                        message: "statement is missing its terminating ';'".into(),
                    });
                }
                current.clear();
                section = if trimmed == UP_MARKER { Section::Up } else { Section::Down };
                continue;
            }
            let blank = trimmed.is_empty() || trimmed.starts_with("--");
            if section == Section::None || (current.is_empty() && blank) {
                continue;
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            if trimmed.ends_with(';') {
                let full = current.trim_end().trim_end_matches(';').trim().to_string();
                match section {
                    Section::Up => up.push(full),
                    Section::Down => down.push(full),
                    Section::None => {}
                }
                current.clear();
            }
        }

        if !current.trim().is_empty() {
            return Err(Error::Migration {
                name,
                message: "statement is missing its terminating ';'".into(),
            });
        }
        Ok(Self { name, up, down })
    }
}

/// Writes `plan` as the next numbered migration in `dir`. Returns `None` when
/// the plan has nothing to do.
pub fn generate_migration(
    dir: &Path,
    name: &str,
    plan: &MigrationPlan,
    dialect: &dyn Dialect,
) -> Result<Option<PathBuf>> {
    if plan.is_empty() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir)?;
    let filename = generate_migration_filename(find_next_migration_number(dir)?, name)?;
    let path = dir.join(&filename);
    let script = MigrationScript::from_plan(file_stem(&path), plan, dialect)?;
    std::fs::write(&path, script.render())?;
    info!(path = %path.display(), steps = plan.len(), "generated migration");
    Ok(Some(path))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Migration scripts in `dir`, ordered by number.
pub fn load_scripts(dir: &Path) -> Result<Vec<MigrationScript>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .map(|f| migration_file_re().is_match(&f.to_string_lossy()))
            .unwrap_or(false);
        if matches {
            paths.push(path);
        }
    }
    paths.sort();
    paths
        .iter()
        .map(|path| MigrationScript::parse(file_stem(path), &std::fs::read_to_string(path)?))
        .collect()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Replays migration files on one driver session and records each one in
/// the migrations table.
pub struct MigrationExecutor<'a> {
    driver: &'a mut dyn SchemaDriver,
    dir: PathBuf,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(driver: &'a mut dyn SchemaDriver, dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            dir: dir.into(),
        }
    }

    pub async fn pending(&mut self) -> Result<Vec<MigrationScript>> {
        let applied: Vec<String> = self
            .driver
            .load_migrations()
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect();
        Ok(load_scripts(&self.dir)?
            .into_iter()
            .filter(|s| !applied.contains(&s.name))
            .collect())
    }

    /// Runs every pending migration in order and returns their names.
    pub async fn run_pending(&mut self) -> Result<Vec<String>> {
        bookkeeping::ensure_tables(&mut *self.driver).await?;
        let mut executed = Vec::new();
        for script in self.pending().await? {
            self.run(&script.name, &script.up, Direction::Up).await?;
            info!(migration = %script.name, "migration applied");
            executed.push(script.name);
        }
        Ok(executed)
    }

    /// Reverts the most recently applied migration, if any.
    pub async fn undo_last(&mut self) -> Result<Option<String>> {
        let Some(last) = self
            .driver
            .load_migrations()
            .await?
            .into_iter()
            .max_by_key(|m| m.id)
        else {
            return Ok(None);
        };
        let script = load_scripts(&self.dir)?
            .into_iter()
            .find(|s| s.name == last.name)
            .ok_or_else(|| Error::Migration {
                name: last.name.clone(),
                message: format!("file not found in {}", self.dir.display()),
            })?;
        self.run(&script.name, &script.down, Direction::Down).await?;
        info!(migration = %script.name, "migration reverted");
        Ok(Some(script.name))
    }

    async fn run(&mut self, name: &str, statements: &[String], direction: Direction) -> Result<()> {
        let transactional = self.driver.dialect().capabilities().transactional_ddl;
        if transactional {
            self.driver.begin().await?;
        }
        let result = self.run_statements(name, statements, direction).await;
        match result {
            Ok(()) => {
                if transactional {
                    self.driver.commit().await?;
                }
                Ok(())
            }
            Err(err) => {
                if self.driver.in_transaction() {
                    if let Err(rollback) = self.driver.rollback().await {
                        warn!(migration = name, error = %rollback, "rollback failed");
                    }
                }
                Err(Error::Migration {
                    name: name.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    async fn run_statements(&mut self, name: &str, statements: &[String], direction: Direction) -> Result<()> {
        for sql in statements {
            self.driver.execute_sql(sql).await?;
        }
        match direction {
            Direction::Up => self.driver.record_migration(now_millis(), name).await,
            Direction::Down => self.driver.forget_migration(name).await,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_next_number_in_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_next_migration_number(dir.path()).unwrap(), 1);
    }

    #[test]
    fn finds_next_number_after_gaps() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001_initial.sql"), "").unwrap();
        fs::write(dir.path().join("0005_skip.sql"), "").unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();
        assert_eq!(find_next_migration_number(dir.path()).unwrap(), 6);
    }

    #[test]
    fn sanitizes_migration_names() {
        assert_eq!(generate_migration_filename(42, "add users").unwrap(), "0042_add_users.sql");
        assert_eq!(generate_migration_filename(3, "multiple---dashes").unwrap(), "0003_multiple_dashes.sql");
        assert_eq!(generate_migration_filename(1, "add@posts!").unwrap(), "0001_addposts.sql");
        assert!(generate_migration_filename(1, "!!!").is_err());
    }

    #[test]
    fn parses_multi_line_statements() {
        let content = "\
-- migrate:up
CREATE TABLE \"post\" (
  \"id\" serial NOT NULL
);
-- a comment
ALTER TABLE \"post\" ADD \"title\" text;

-- migrate:down
ALTER TABLE \"post\" DROP COLUMN \"title\";
DROP TABLE \"post\";
";
        let script = MigrationScript::parse("0001_init", content).unwrap();
        assert_eq!(script.up.len(), 2);
        assert!(script.up[0].starts_with("CREATE TABLE"));
        assert!(script.up[0].ends_with(')'));
        assert_eq!(script.down, vec!["ALTER TABLE \"post\" DROP COLUMN \"title\"", "DROP TABLE \"post\""]);
    }

    #[test]
    fn unterminated_statement_is_an_error() {
        let content = "-- migrate:up\nCREATE TABLE t (id int)\n-- migrate:down\n";
        assert!(matches!(
            MigrationScript::parse("0001_bad", content),
            Err(Error::Migration { .. })
        ));
    }

    #[test]
    fn render_then_parse_keeps_statements() {
        let script = MigrationScript {
            name: "0002_tags".into(),
            up: vec!["CREATE TABLE \"tag\" (\"id\" serial NOT NULL)".into()],
            down: vec!["DROP TABLE \"tag\"".into()],
        };
        assert_eq!(MigrationScript::parse("0002_tags", &script.render()).unwrap(), script);
    }

    #[test]
    fn scripts_load_in_number_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0002_b.sql"), "-- migrate:up\nSELECT 2;\n-- migrate:down\n").unwrap();
        fs::write(dir.path().join("0001_a.sql"), "-- migrate:up\nSELECT 1;\n-- migrate:down\n").unwrap();
        let names: Vec<_> = load_scripts(dir.path()).unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["0001_a", "0002_b"]);
    }
}
