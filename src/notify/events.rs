//! User event notification rendering
//!
//! Turns a warn/ban/unban event into the mail a user receives. Users
//! without a known mail address yield no message; the caller decides
//! whether that is worth a log line.

use crate::notify::MailMessage;
use crate::types::{fmt_hours, MonitoredUser, UserEvent};

/// Render the notification mail for one user, or `None` when the user
/// has no mail address on record.
pub fn event_mail(user: &MonitoredUser, event: UserEvent, feature: &str) -> Option<MailMessage> {
    let to = user.user.mail.clone()?;
    let name = user.user.safe_name().to_string();
    let used = fmt_hours(user.usage);
    let allowed = fmt_hours(user.allowed_usage);

    let (subject, body) = match event {
        UserEvent::Warn => (
            format!("{feature} license usage warning"),
            format!(
                "Hello {name},\n\n\
                 you have been holding a {feature} license for {used} of your \
                 allowed {allowed}. Please save your work and release the \
                 license when you can; once the budget is exhausted your \
                 access may be suspended to keep licenses available.\n"
            ),
        ),
        UserEvent::Ban => (
            format!("{feature} license access suspended"),
            format!(
                "Hello {name},\n\n\
                 your {feature} license access has been suspended after \
                 {used} of accumulated usage, to keep licenses available \
                 for other users. Access is restored automatically; you \
                 will be notified when it is.\n"
            ),
        ),
        UserEvent::Unban => (
            format!("{feature} license access restored"),
            format!(
                "Hello {name},\n\n\
                 your {feature} license access has been restored and your \
                 usage counter reset. You can check out licenses again.\n"
            ),
        ),
    };

    Some(MailMessage {
        to: vec![to],
        subject,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use chrono::Duration;

    fn user_with_mail() -> MonitoredUser {
        let mut user = MonitoredUser::new(UserId::new("SBX035"));
        user.user.mail = Some("sbx035@pool.example".to_string());
        user.usage = Duration::hours(9);
        user
    }

    #[test]
    fn user_without_mail_yields_no_message() {
        let user = MonitoredUser::new(UserId::new("SBX035"));
        assert!(event_mail(&user, UserEvent::Warn, "DOORS").is_none());
    }

    #[test]
    fn warn_mail_carries_usage_and_budget() {
        let mail = event_mail(&user_with_mail(), UserEvent::Warn, "DOORS").unwrap();
        assert_eq!(mail.to, vec!["sbx035@pool.example".to_string()]);
        assert!(mail.subject.contains("DOORS"));
        assert!(mail.body.contains("9.00 h"));
        assert!(mail.body.contains("10.00 h"));
    }

    #[test]
    fn ban_and_unban_mails_name_the_event() {
        let ban = event_mail(&user_with_mail(), UserEvent::Ban, "DOORS").unwrap();
        assert!(ban.subject.contains("suspended"));
        let unban = event_mail(&user_with_mail(), UserEvent::Unban, "DOORS").unwrap();
        assert!(unban.subject.contains("restored"));
    }

    #[test]
    fn display_name_is_preferred_over_uid() {
        let mut user = user_with_mail();
        user.user.name = Some("Jo Fielder".to_string());
        let mail = event_mail(&user, UserEvent::Warn, "DOORS").unwrap();
        assert!(mail.body.contains("Hello Jo Fielder,"));
    }
}
