//! Email notifications for booked appointments.

use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::path::Path;

use crate::config::{EmailConfig, EmailTransportConfig};
use crate::errors::Error;

/// Mailer for appointment confirmations.
///
/// Sends are fire-and-forget from the classification path: the caller spawns
/// the send and logs failures, never failing the transition that produced
/// the appointment.
pub struct AppointmentMailer {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    notify_to: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

/// Contact identity carried on an appointment notification. Values confirmed
/// verbally during the call take precedence over stored contact fields.
#[derive(Debug, Clone, Default)]
pub struct AppointmentContact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl AppointmentMailer {
    pub fn new(config: &EmailConfig) -> Result<Self, Error> {
        let transport = match &config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            notify_to: config.notify_to.clone(),
        })
    }

    /// Send the booked-appointment notification to the operator address.
    pub async fn send_appointment_booked(
        &self,
        contact: &AppointmentContact,
        appointment_at: Option<DateTime<Utc>>,
        raw_date: Option<&str>,
        raw_time: Option<&str>,
        summary: Option<&str>,
    ) -> Result<(), Error> {
        let when = match appointment_at {
            Some(at) => at.format("%A %B %-d, %Y at %H:%M UTC").to_string(),
            None => format!(
                "{} {}",
                raw_date.unwrap_or("(no date)"),
                raw_time.unwrap_or("")
            )
            .trim()
            .to_string(),
        };

        let subject = format!(
            "Appointment booked: {}",
            contact.name.as_deref().unwrap_or("unknown contact")
        );
        let body = format!(
            "<h2>Appointment booked</h2>\
             <p><b>Contact:</b> {}</p>\
             <p><b>Phone:</b> {}</p>\
             <p><b>Email:</b> {}</p>\
             <p><b>When:</b> {}</p>\
             <p><b>Call summary:</b> {}</p>",
            contact.name.as_deref().unwrap_or("-"),
            contact.phone.as_deref().unwrap_or("-"),
            contact.email.as_deref().unwrap_or("-"),
            when,
            summary.unwrap_or("-"),
        );

        self.send_email(&self.notify_to, &subject, &body).await
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = to_email.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(transport) => {
                transport.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send email via SMTP: {e}"),
                })?;
            }
            EmailTransport::File(transport) => {
                transport.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("write email to file: {e}"),
                })?;
            }
        }

        tracing::debug!(to = %to_email, subject = %subject, "Sent appointment notification email");
        Ok(())
    }
}
