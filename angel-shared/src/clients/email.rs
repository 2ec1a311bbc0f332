use reqwest::Client;
use serde::Serialize;

#[derive(Clone)]
pub struct EmailClient {
    client: Client,
    api_key: String,
    from_email: String,
    from_name: String,
}

#[derive(Debug, Serialize)]
struct ResendRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
}

impl EmailClient {
    pub fn new(api_key: &str, from_email: &str, from_name: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
        }
    }

    /// No API key configured means outbound mail is disabled (local runs).
    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub async fn send_email(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        if !self.is_enabled() {
            tracing::warn!(to = %to, subject = %subject, "email disabled, message dropped");
            return Ok(());
        }

        let request = ResendRequest {
            from: format!("{} <{}>", self.from_name, self.from_email),
            to: vec![to.to_string()],
            subject: subject.to_string(),
            html: html.to_string(),
        };

        let response = self.client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("email API returned {status}: {body}");
        }

        tracing::debug!(to = %to, subject = %subject, "email sent");
        Ok(())
    }

    pub async fn send_password_reset(&self, to: &str, reset_url: &str, ttl_minutes: i64) -> anyhow::Result<()> {
        let html = password_reset_html(reset_url, ttl_minutes);
        self.send_email(to, "Angelclass - Reset your password", &html).await
    }
}

fn password_reset_html(reset_url: &str, ttl_minutes: i64) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
        <h2 style="color: #b8860b;">Angelclass - Password Reset</h2>
        <p>Someone asked to reset the password for your account.</p>
        <p><a href="{reset_url}" style="background: #b8860b; color: #fff; padding: 12px 20px; border-radius: 6px; text-decoration: none;">Choose a new password</a></p>
        <p style="color: #666; margin-top: 20px;">This link expires in {ttl_minutes} minutes. If you did not request this, please ignore this email.</p>
        </div>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_email_embeds_link_and_expiry() {
        let html = password_reset_html("https://app.example/reset?token=abc", 60);
        assert!(html.contains("https://app.example/reset?token=abc"));
        assert!(html.contains("60 minutes"));
    }

    #[tokio::test]
    async fn disabled_client_drops_messages() {
        let client = EmailClient::new("", "noreply@example.com", "Angelclass");
        assert!(!client.is_enabled());
        assert!(client.send_email("a@example.com", "hi", "<p>hi</p>").await.is_ok());
    }
}
