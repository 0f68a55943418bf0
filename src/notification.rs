use crate::presentation::{DISPLAY_DATE_FORMAT, format_date};
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, MultiPart};
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

const SIGNATURE: &str = "School Gradebook";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Student has no email address on file")]
    MissingRecipient,

    #[error("Invalid email address: {0}")]
    InvalidAddress(#[from] lettre::address::AddressError),

    #[error("Mail could not be built: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("Mail transport failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Notification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The "new grade" message sent to a student.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeMail {
    pub recipient: Option<String>,
    pub student_name: String,
    pub subject_name: String,
    pub class_name: String,
    pub grade_value: i16,
    pub note: Option<String>,
    pub graded_at: DateTime<Utc>,
}

impl GradeMail {
    pub fn subject_line(&self) -> String {
        format!("New grade in {}", self.subject_name)
    }

    pub fn text_body(&self) -> String {
        let mut body = format!(
            "Hello {},\n\na new grade has been added for you.\n\n\
             Subject: {}\nClass: {}\nGrade: {}\nDate: {}\n",
            self.student_name,
            self.subject_name,
            self.class_name,
            self.grade_value,
            format_date(&self.graded_at, DISPLAY_DATE_FORMAT),
        );
        if let Some(note) = &self.note {
            body.push_str(&format!("Note: {}\n", note));
        }
        body.push_str(&format!("\n{}\n", SIGNATURE));
        body
    }

    pub fn html_body(&self) -> String {
        let mut rows = vec![
            ("Subject", escape_html(&self.subject_name)),
            ("Class", escape_html(&self.class_name)),
            ("Grade", self.grade_value.to_string()),
            ("Date", format_date(&self.graded_at, DISPLAY_DATE_FORMAT)),
        ];
        if let Some(note) = &self.note {
            rows.push(("Note", escape_html(note)));
        }
        let rows: String = rows
            .into_iter()
            .map(|(label, value)| {
                format!(
                    "<tr><td><strong>{}:</strong></td><td>{}</td></tr>",
                    label, value
                )
            })
            .collect();

        format!(
            "<div style=\"font-family: Arial, sans-serif; max-width: 600px;\">\
             <h2>New grade in your gradebook</h2>\
             <p>Hello <strong>{}</strong>,</p>\
             <p>a new grade has been added for you.</p>\
             <table style=\"border-collapse: collapse;\">{}</table>\
             <p style=\"margin-top: 20px;\"><em>{}</em></p></div>",
            escape_html(&self.student_name),
            rows,
            SIGNATURE
        )
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Outbound channel for grade notifications. Implementations may block.
pub trait GradeNotifier: Send + Sync {
    fn notify_grade(&self, mail: &GradeMail) -> Result<(), NotificationError>;
}

/// Sends notifications over plain SMTP.
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(host: &str, port: u16, from: &str) -> Result<Self, NotificationError> {
        let transport = SmtpTransport::builder_dangerous(host).port(port).build();
        Ok(Self {
            transport,
            from: from.parse()?,
        })
    }
}

impl GradeNotifier for SmtpNotifier {
    fn notify_grade(&self, mail: &GradeMail) -> Result<(), NotificationError> {
        let recipient = mail
            .recipient
            .as_deref()
            .ok_or(NotificationError::MissingRecipient)?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient.parse()?)
            .subject(mail.subject_line())
            .multipart(MultiPart::alternative_plain_html(
                mail.text_body(),
                mail.html_body(),
            ))?;

        self.transport.send(&message)?;
        info!("Grade notification sent to {}", recipient);
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them. Used when no
/// SMTP host is configured.
pub struct LogNotifier;

impl GradeNotifier for LogNotifier {
    fn notify_grade(&self, mail: &GradeMail) -> Result<(), NotificationError> {
        let recipient = mail
            .recipient
            .as_deref()
            .ok_or(NotificationError::MissingRecipient)?;
        info!(
            "Grade notification for {} <{}>: {}\n{}",
            mail.student_name,
            recipient,
            mail.subject_line(),
            mail.text_body()
        );
        Ok(())
    }
}

/// Runs the notifier on the blocking pool.
#[instrument(skip(notifier, mail), fields(subject = %mail.subject_name))]
pub async fn dispatch(notifier: Arc<dyn GradeNotifier>, mail: GradeMail) -> Result<(), NotificationError> {
    tokio::task::spawn_blocking(move || notifier.notify_grade(&mail)).await?
}
