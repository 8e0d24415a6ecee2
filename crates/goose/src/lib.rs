use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Runs goose migrations by spawning the goose binary.
pub struct MigrationRunner {
    /// `goose` if on PATH, otherwise an absolute path
    goose_binary_path: String,
    migrations_dir: String,
    /// goose driver name, e.g. `clickhouse`
    driver: String,
    dsn: String,
}

impl MigrationRunner {
    pub fn new(
        goose_binary_path: String,
        migrations_dir: String,
        driver: String,
        dsn: String,
    ) -> Self {
        Self {
            goose_binary_path,
            migrations_dir,
            driver,
            dsn,
        }
    }

    /// Runner for ClickHouse over the native protocol.
    ///
    /// `native_addr` is `host:port` of the native (TCP) interface, not the HTTP one.
    pub fn clickhouse(
        goose_binary_path: String,
        migrations_dir: String,
        native_addr: &str,
        database: &str,
        username: &str,
        password: &str,
    ) -> Self {
        let dsn = format!(
            "clickhouse://{}:{}@{}/{}",
            username, password, native_addr, database
        );
        Self::new(
            goose_binary_path,
            migrations_dir,
            "clickhouse".to_string(),
            dsn,
        )
    }

    /// `goose up`: apply every pending migration
    pub async fn run_migrations(&self) -> Result<()> {
        info!(dir = %self.migrations_dir, driver = %self.driver, "running migrations");
        let stdout = self.goose("up").await?;
        debug!("migrations completed successfully:\n{}", stdout);
        Ok(())
    }

    /// `goose down`: roll back the most recent migration
    pub async fn rollback_migration(&self) -> Result<()> {
        info!(dir = %self.migrations_dir, "rolling back most recent migration");
        let stdout = self.goose("down").await?;
        debug!("rollback completed successfully:\n{}", stdout);
        Ok(())
    }

    /// `goose status` output
    pub async fn migration_status(&self) -> Result<String> {
        self.goose("status").await
    }

    async fn goose(&self, command: &str) -> Result<String> {
        let output = Command::new(&self.goose_binary_path)
            .arg("-dir")
            .arg(&self.migrations_dir)
            .arg(&self.driver)
            .arg(&self.dsn)
            .arg(command)
            .output()
            .await
            .with_context(|| format!("failed to execute {}", self.goose_binary_path))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "goose {} failed ({}).\nstdout: {}\nstderr: {}",
                command,
                output.status,
                stdout,
                stderr
            );
        }

        Ok(stdout)
    }
}
