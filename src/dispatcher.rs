use crate::aggregator::AggregatedRow;
use crate::models::{DatabaseConfig, EmailConfig};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tiberius::{AuthMethod, Client, Config as SqlConfig};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid stored procedure name: {0:?}")]
    InvalidProcedure(String),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL Server error: {0}")]
    Sql(#[from] tiberius::error::Error),
}

/// Outcome of one reminder batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub connected: bool,
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Something that can deliver a reminder body to a recipient.
#[async_trait]
pub trait ReminderGateway: Send {
    async fn send(&mut self, recipient: &str, body: &str) -> Result<(), DispatchError>;

    async fn close(self) -> Result<(), DispatchError>
    where
        Self: Sized;
}

/// Calls the mail stored procedure on SQL Server, one `EXEC` per reminder.
/// Each call runs in autocommit mode and is committed on its own.
pub struct SqlServerGateway {
    client: Client<Compat<TcpStream>>,
    query: String,
}

impl SqlServerGateway {
    pub async fn connect(db: &DatabaseConfig) -> Result<Self, DispatchError> {
        let query = procedure_call(&db.procedure)?;

        let mut config = SqlConfig::new();
        config.host(&db.host);
        config.port(db.port);
        config.database(&db.database);
        config.authentication(AuthMethod::sql_server(&db.username, &db.password));
        if db.trust_cert {
            config.trust_cert();
        }

        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write()).await?;

        info!(host = %db.host, database = %db.database, "connected to SQL Server");
        Ok(Self { client, query })
    }
}

#[async_trait]
impl ReminderGateway for SqlServerGateway {
    async fn send(&mut self, recipient: &str, body: &str) -> Result<(), DispatchError> {
        self.client.execute(self.query.as_str(), &[&recipient, &body]).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), DispatchError> {
        self.client.close().await?;
        Ok(())
    }
}

/// Logs each reminder instead of sending it.
#[derive(Debug, Default)]
pub struct DryRunGateway {
    pub delivered: Vec<(String, String)>,
}

#[async_trait]
impl ReminderGateway for DryRunGateway {
    async fn send(&mut self, recipient: &str, body: &str) -> Result<(), DispatchError> {
        info!(recipient, bytes = body.len(), "dry run: reminder not sent");
        self.delivered.push((recipient.to_string(), body.to_string()));
        Ok(())
    }

    async fn close(self) -> Result<(), DispatchError> {
        info!(reminders = self.delivered.len(), "dry run finished");
        Ok(())
    }
}

/// Builds `EXEC <name> @P1, @P2`, accepting only plain (optionally
/// schema-qualified) identifiers since the name cannot be bound as a parameter.
pub fn procedure_call(name: &str) -> Result<String, DispatchError> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap());
    if !ident.is_match(name) {
        return Err(DispatchError::InvalidProcedure(name.to_string()));
    }
    Ok(format!("EXEC {} @P1, @P2", name))
}

pub fn compose_body(row: &AggregatedRow, email: &EmailConfig) -> String {
    let mut body = String::new();
    if email.test_banner {
        body.push_str("\n<b>THIS IS A TEST EMAIL</b><br><br>\n");
    }
    body.push_str(&format!(
        "\nDear Team,<br><br> Just a quick reminder to complete your Boost Training sessions at earliest convenience.<br>\
         Link and pathway is as below:<br> {} <br>\
         If you encounter any difficulties or have questions, please don't hesitate to reach out to us.<br>\
         Ignore if already completed!!<br><br>\n\n{}\n",
        email.course_link, row.training_details
    ));
    body
}

fn recipient_for<'a>(row: &'a AggregatedRow, email: &'a EmailConfig) -> &'a str {
    match (&row.email, email.send_to_user) {
        (Some(address), true) => address,
        _ => &email.recipient,
    }
}

/// Sends reminders for the last `max_emails` rows through `gateway`.
/// A failed send is logged and counted; the loop moves on without retrying.
pub async fn dispatch_reminders<G: ReminderGateway>(
    gateway: &mut G,
    rows: &[AggregatedRow],
    email: &EmailConfig,
) -> DispatchReport {
    let mut report = DispatchReport {
        connected: true,
        ..Default::default()
    };

    let start = rows.len().saturating_sub(email.max_emails);
    if start > 0 {
        info!(skipped = start, limit = email.max_emails, "only the last rows are mailed");
    }

    for row in &rows[start..] {
        let recipient = recipient_for(row, email);
        let body = compose_body(row, email);
        report.attempted += 1;

        match gateway.send(recipient, &body).await {
            Ok(()) => {
                report.sent += 1;
                info!(user_id = %row.user_id, recipient, "reminder sent");
            }
            Err(e) => {
                report.failed += 1;
                error!(user_id = %row.user_id, error = %e, "error calling stored procedure");
            }
        }
    }

    report
}

/// Runs one batch over an already attempted connection. A failed connection
/// is logged and nothing is sent; an open one is always closed afterwards.
pub async fn dispatch_over<G: ReminderGateway>(
    connection: Result<G, DispatchError>,
    rows: &[AggregatedRow],
    email: &EmailConfig,
) -> DispatchReport {
    let mut gateway = match connection {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "error connecting to mail database");
            return DispatchReport::default();
        }
    };

    let report = dispatch_reminders(&mut gateway, rows, email).await;

    if let Err(e) = gateway.close().await {
        warn!(error = %e, "error closing connection");
    }
    report
}

pub async fn send_reminders(rows: &[AggregatedRow], db: &DatabaseConfig, email: &EmailConfig) -> DispatchReport {
    dispatch_over(SqlServerGateway::connect(db).await, rows, email).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingGateway {
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl ReminderGateway for RecordingGateway {
        async fn send(&mut self, _recipient: &str, body: &str) -> Result<(), DispatchError> {
            let attempt = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(body.to_string());
                sent.len() - 1
            };
            if self.fail_on.contains(&attempt) {
                return Err(DispatchError::Io(std::io::Error::other("procedure failed")));
            }
            Ok(())
        }

        async fn close(self) -> Result<(), DispatchError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn row(n: usize) -> AggregatedRow {
        AggregatedRow {
            user_id: format!("U{}", n),
            full_name: format!("USER {}", n),
            email: Some(format!("u{}@example.com", n)),
            record: Vec::new(),
            training_count: 1,
            training_details: format!("<table>details {}</table>", n),
        }
    }

    #[tokio::test]
    async fn only_the_last_ten_rows_are_attempted() {
        let rows: Vec<AggregatedRow> = (0..25).map(row).collect();
        let gateway = RecordingGateway::default();

        let report = dispatch_over(Ok(gateway.clone()), &rows, &EmailConfig::default()).await;

        assert_eq!(report, DispatchReport { connected: true, attempted: 10, sent: 10, failed: 0 });
        let sent = gateway.sent.lock().unwrap();
        assert!(sent[0].contains("details 15"));
        assert!(sent[9].contains("details 24"));
        assert!(gateway.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_sends_do_not_stop_the_batch() {
        let rows: Vec<AggregatedRow> = (0..4).map(row).collect();
        let gateway = RecordingGateway {
            fail_on: vec![0, 2],
            ..Default::default()
        };

        let report = dispatch_over(Ok(gateway.clone()), &rows, &EmailConfig::default()).await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 2);
        assert!(gateway.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn connection_failure_sends_nothing() {
        let rows: Vec<AggregatedRow> = (0..3).map(row).collect();
        let connection: Result<RecordingGateway, _> =
            Err(DispatchError::Io(std::io::Error::other("connection refused")));

        let report = dispatch_over(connection, &rows, &EmailConfig::default()).await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn recipient_follows_send_to_user() {
        let rows = vec![row(1)];
        let mut email = EmailConfig::default();

        let mut gateway = DryRunGateway::default();
        dispatch_reminders(&mut gateway, &rows, &email).await;
        assert_eq!(gateway.delivered[0].0, email.recipient);

        email.send_to_user = true;
        let mut gateway = DryRunGateway::default();
        dispatch_reminders(&mut gateway, &rows, &email).await;
        assert_eq!(gateway.delivered[0].0, "u1@example.com");
    }

    #[test]
    fn body_embeds_details_and_link() {
        let email = EmailConfig::default();
        let body = compose_body(&row(3), &email);
        assert!(body.contains("THIS IS A TEST EMAIL"));
        assert!(body.contains(&email.course_link));
        assert!(body.ends_with("<table>details 3</table>\n"));

        let quiet = EmailConfig {
            test_banner: false,
            ..EmailConfig::default()
        };
        assert!(!compose_body(&row(3), &quiet).contains("TEST EMAIL"));
    }

    #[test]
    fn procedure_names_are_validated() {
        assert_eq!(procedure_call("Boost_Training").unwrap(), "EXEC Boost_Training @P1, @P2");
        assert_eq!(procedure_call("dbo.SendMail").unwrap(), "EXEC dbo.SendMail @P1, @P2");
        assert!(procedure_call("x; DROP TABLE users").is_err());
        assert!(procedure_call("").is_err());
    }
}
