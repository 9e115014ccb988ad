//! Strictly ordered statement execution over an async session.
//!
//! Some drivers must read a session-scoped value (such as the last generated
//! id) right after a statement, before anything else runs on the session.
//! [`StatementQueue`] serialises statements through a single task so each
//! statement and its follow-up complete before the next one starts.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::util::{Error, Result};

#[async_trait]
pub trait StatementRunner: Send + 'static {
    type Output: Send + 'static;

    async fn run(&mut self, sql: &str) -> Result<Self::Output>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedStatement {
    pub sql: String,
    pub follow_up: Option<String>,
}

impl QueuedStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, sql: impl Into<String>) -> Self {
        self.follow_up = Some(sql.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementOutcome<O> {
    pub output: O,
    pub follow_up: Option<O>,
}

struct Job<O> {
    statement: QueuedStatement,
    reply: oneshot::Sender<Result<StatementOutcome<O>>>,
}

/// Cloneable handle to a per-session FIFO of statements.
pub struct StatementQueue<O> {
    sender: mpsc::Sender<Job<O>>,
}

impl<O> Clone for StatementQueue<O> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<O: Send + 'static> StatementQueue<O> {
    /// Starts the worker owning `runner`. The join handle yields the runner
    /// back once every handle has been dropped.
    pub fn spawn<R>(mut runner: R, capacity: usize) -> (Self, JoinHandle<R>)
    where
        R: StatementRunner<Output = O>,
    {
        let (sender, mut receiver) = mpsc::channel::<Job<O>>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let outcome = run_job(&mut runner, &job.statement).await;
                if job.reply.send(outcome).is_err() {
                    debug!(sql = %job.statement.sql, "statement caller went away");
                }
            }
            runner
        });
        (Self { sender }, worker)
    }

    pub async fn submit(&self, statement: QueuedStatement) -> Result<StatementOutcome<O>> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Job { statement, reply })
            .await
            .map_err(|_| closed())?;
        response.await.map_err(|_| closed())?
    }

    pub async fn execute(&self, sql: impl Into<String>) -> Result<O> {
        Ok(self.submit(QueuedStatement::new(sql)).await?.output)
    }
}

async fn run_job<R: StatementRunner>(
    runner: &mut R,
    statement: &QueuedStatement,
) -> Result<StatementOutcome<R::Output>> {
    let output = runner.run(&statement.sql).await?;
    let follow_up = match &statement.follow_up {
        Some(sql) => Some(runner.run(sql).await?),
        None => None,
    };
    Ok(StatementOutcome { output, follow_up })
}

fn closed() -> Error {
    Error::ConnectionLifecycle("statement queue is closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Fake session with a session-scoped last insert id.
    #[derive(Default)]
    struct FakeSession {
        last_id: u64,
        log: Vec<String>,
    }

    #[async_trait]
    impl StatementRunner for FakeSession {
        type Output = u64;

        async fn run(&mut self, sql: &str) -> Result<u64> {
            self.log.push(sql.to_string());
            if sql.starts_with("INSERT") {
                tokio::time::sleep(Duration::from_millis(1)).await;
                self.last_id += 1;
                Ok(0)
            } else if sql == "SELECT LAST_INSERT_ID()" {
                Ok(self.last_id)
            } else if sql == "FAIL" {
                Err(Error::database("boom"))
            } else {
                Ok(0)
            }
        }
    }

    #[tokio::test]
    async fn follow_up_runs_before_next_statement() {
        let (queue, worker) = StatementQueue::spawn(FakeSession::default(), 16);
        let mut tasks = Vec::new();
        for i in 0..10 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                let statement = QueuedStatement::new(format!("INSERT {i}"))
                    .with_follow_up("SELECT LAST_INSERT_ID()");
                queue.submit(statement).await
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            ids.push(outcome.follow_up.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());

        drop(queue);
        let session = worker.await.unwrap();
        for pair in session.log.chunks(2) {
            assert!(pair[0].starts_with("INSERT"));
            assert_eq!(pair[1], "SELECT LAST_INSERT_ID()");
        }
    }

    #[tokio::test]
    async fn failure_is_returned_to_its_caller_only() {
        let (queue, _worker) = StatementQueue::spawn(FakeSession::default(), 4);
        assert!(queue.execute("FAIL").await.is_err());
        assert_eq!(queue.execute("SELECT 1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_queue_reports_lifecycle_error() {
        let (queue, worker) = StatementQueue::spawn(FakeSession::default(), 1);
        worker.abort();
        let _ = worker.await;
        let err = queue.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLifecycle(_)));
    }
}
