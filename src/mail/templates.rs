use crate::access::Role;

pub const INVITE_SUBJECT: &str = "Invite to Train-Sync";
pub const RESET_SUBJECT: &str = "Reset your Train-Sync password";
pub const SUBSCRIPTION_SUBJECT: &str = "New subscription from the website";
pub const CONTACT_REPLY_SUBJECT: &str = "Thank you for contacting Train-Sync";

/// Visitor-supplied text goes through this before it is placed in markup.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>{title}</title>
  <meta http-equiv="Content-Type" content="text/html; charset=utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="background-color:#f9f9f9;margin:0;padding:0;font-family:Arial,sans-serif;">
  <table width="100%" border="0" cellpadding="0" cellspacing="0">
    <tr><td align="center" style="padding:30px 40px;background-color:#ffffff;">
{body}
    </td></tr>
    <tr><td align="center" style="padding:25px 40px;color:#555555;font-size:14px;">
      If you have any questions, feel free to message us at support@train-sync.com.
    </td></tr>
  </table>
</body>
</html>"#
    )
}

fn button(href: &str, label: &str) -> String {
    format!(
        r#"      <a href="{href}" style="background-color:#ff4081;color:white;padding:15px 30px;text-decoration:none;border-radius:5px;font-size:18px;display:inline-block;">{label}</a>"#
    )
}

/// Invitation mail with the signup link carrying the invite token.
pub fn invite_html(base_url: &str, token: &str, role: Role, ttl_days: i64) -> String {
    let url = format!("{}/invite-signup?token={}", base_url.trim_end_matches('/'), token);
    let role = match role {
        Role::User => "User",
        Role::Coach => "Coach",
        Role::Admin => "Admin",
    };
    let body = format!(
        "      <h1 style=\"color:#191919;\">You're Invited to Train-Sync!</h1>\n      <p style=\"font-size:22px;\">Join as a {role}</p>\n{}\n      <p>This invitation link will expire in {ttl_days} days.</p>",
        button(&url, "Accept Invitation")
    );
    layout("Join Train-Sync!", &body)
}

/// Password reset mail with the reset link.
pub fn reset_html(base_url: &str, token: &str, ttl_minutes: i64) -> String {
    let url = format!("{}/reset-password?token={}", base_url.trim_end_matches('/'), token);
    let body = format!(
        "      <h1 style=\"color:#191919;\">Reset your password</h1>\n      <p>Someone asked to reset the password for your account. If it was not you, ignore this mail.</p>\n{}\n      <p>The link is valid for {ttl_minutes} minutes and can be used once.</p>",
        button(&url, "Choose a new password")
    );
    layout("Password reset", &body)
}

/// Notice to the site owner about a newsletter signup.
pub fn subscription_html(name: &str, email: &str) -> String {
    let body = format!(
        "      <h1 style=\"color:#191919;\">New subscription</h1>\n      <p>A visitor subscribed on the website.</p>\n      <p><strong>Name:</strong> {}<br><strong>Email:</strong> {}</p>",
        escape(name),
        escape(email)
    );
    layout("New subscription", &body)
}

pub fn contact_subject(subject: &str) -> String {
    format!("New contact form message: {subject}")
}

/// Contact-form message as delivered to the support inbox.
pub fn contact_support_html(name: &str, email: &str, subject: &str, message: &str) -> String {
    let body = format!(
        "      <h1 style=\"color:#191919;\">New contact form submission</h1>\n      <p><strong>From:</strong> {} ({})</p>\n      <p><strong>Subject:</strong> {}</p>\n      <p style=\"white-space:pre-wrap;\">{}</p>",
        escape(name),
        escape(email),
        escape(subject),
        escape(message)
    );
    layout("Contact form", &body)
}

/// Acknowledgement sent back to the visitor.
pub fn contact_reply_html(name: &str, subject: &str, message: &str) -> String {
    let body = format!(
        "      <h1 style=\"color:#191919;\">Thank you for contacting Train-Sync</h1>\n      <p>Dear {},</p>\n      <p>We have received your message and will get back to you as soon as possible.</p>\n      <p><strong>Subject:</strong> {}</p>\n      <p style=\"white-space:pre-wrap;\">{}</p>",
        escape(name),
        escape(subject),
        escape(message)
    );
    layout("Thank you", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_link_carries_token_and_role() {
        let html = invite_html("https://train-sync.com/", "abc_123", Role::Coach, 7);
        assert!(html.contains("https://train-sync.com/invite-signup?token=abc_123"));
        assert!(html.contains("Join as a Coach"));
        assert!(html.contains("expire in 7 days"));
    }

    #[test]
    fn reset_link_carries_token() {
        let html = reset_html("https://app.local", "tok", 60);
        assert!(html.contains("https://app.local/reset-password?token=tok"));
        assert!(html.contains("60 minutes"));
    }

    #[test]
    fn visitor_text_is_escaped() {
        assert_eq!(escape(r#"<b>"Tom" & 'Jerry'</b>"#), "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;");
        let html = contact_support_html("Eve", "eve@example.com", "Hi", "<script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn subscription_notice_names_the_visitor() {
        let html = subscription_html("Ann Lee", "ann@example.com");
        assert!(html.contains("Ann Lee"));
        assert!(html.contains("ann@example.com"));
    }
}
