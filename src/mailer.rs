use serde::Serialize;
use tera::{Context, Tera};

use crate::errors::AppError;

pub const NOTIFICATION_TEMPLATE: &str = "email/register.html";

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let dir = crate::config::templates_dir();
        let mut tera = match Tera::new(&format!("{dir}/**/*")) {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

/// Payload rendered into the notification template.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EmailContent {
    pub title: String,
    pub short_description: String,
    pub subtitle: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub trait Mailer: Send + Sync {
    fn send(
        &self,
        content: &EmailContent,
        subject: &str,
        to: &str,
        template: &str,
    ) -> Result<(), AppError>;
}

/// Renders the email through Tera and hands it to the log. Delivery to an
/// SMTP relay sits behind the same trait.
pub struct TemplateMailer {
    from: String,
}

impl TemplateMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

pub fn render(content: &EmailContent, template: &str) -> Result<String, AppError> {
    let context = Context::from_serialize(content)?;
    TEMPLATES.render(template, &context).map_err(|e| {
        log::error!("Failed to render template: {}", e);
        AppError::TemplateError(e)
    })
}

impl Mailer for TemplateMailer {
    fn send(
        &self,
        content: &EmailContent,
        subject: &str,
        to: &str,
        template: &str,
    ) -> Result<(), AppError> {
        let body = render(content, template)?;
        log::info!("Email '{}' from {} to {} ({} bytes)", subject, self.from, to, body.len());
        log::debug!("{}", body);
        Ok(())
    }
}

/// Sends after the triggering change has been committed. A failure is logged
/// and never undoes that change.
pub fn send_email(mailer: &dyn Mailer, content: &EmailContent, subject: &str, to: &str) {
    if let Err(e) = mailer.send(content, subject, to, NOTIFICATION_TEMPLATE) {
        log::error!("Failed to send '{}' email to {}: {}", subject, to, e);
    }
}
