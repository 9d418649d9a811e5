//! Per-state input parsers. Each parser returns either the parsed value or an
//! `InputRejection` describing why the input was not accepted; callers turn a
//! rejection into a re-prompt rather than an error.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::domain::offering::{Offering, OfferingId};

pub const OFFERING_SELECTION_PREFIX: &str = "offering:";
pub const CONFIRM_SELECTION_ID: &str = "confirm";
pub const CANCEL_SELECTION_ID: &str = "cancel";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    Missing,
    Malformed,
    InPast,
    NotFound,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "required",
            Self::Malformed => "format",
            Self::InPast => "not_future",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputRejection {
    pub field: &'static str,
    pub reason: RejectionReason,
    pub message: String,
}

impl InputRejection {
    fn new(field: &'static str, reason: RejectionReason, message: impl Into<String>) -> Self {
        Self { field, reason, message: message.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentReply {
    Confirm,
    Cancel,
    Unclear,
}

pub fn parse_future_date(input: &str, now: DateTime<Utc>) -> Result<NaiveDate, InputRejection> {
    let trimmed = input.trim();
    let example = (now + Duration::days(1)).date_naive().format("%Y-%m-%d");
    if trimmed.is_empty() {
        return Err(InputRejection::new(
            "date",
            RejectionReason::Missing,
            format!("Please send a future date in YYYY-MM-DD format, for example {example}."),
        ));
    }

    let bytes = trimmed.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes.iter().enumerate().all(|(index, byte)| index == 4 || index == 7 || byte.is_ascii_digit());
    let parsed = shaped.then(|| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()).flatten();

    let Some(date) = parsed else {
        return Err(InputRejection::new(
            "date",
            RejectionReason::Malformed,
            format!("Please send a future date in YYYY-MM-DD format, for example {example}."),
        ));
    };

    if date <= now.date_naive() {
        return Err(InputRejection::new(
            "date",
            RejectionReason::InPast,
            format!("{date} is not in the future. Please send a future date, for example {example}."),
        ));
    }

    Ok(date)
}

/// Accepts a 24-hour `HH:MM` slot label and returns it normalized.
pub fn parse_slot(input: &str) -> Result<String, InputRejection> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InputRejection::new(
            "time",
            RejectionReason::Missing,
            "Please send a time in 24-hour HH:MM format, for example 14:30.",
        ));
    }

    let bytes = trimmed.as_bytes();
    let valid = bytes.len() == 5
        && bytes[2] == b':'
        && [0, 1, 3, 4].iter().all(|index| bytes[*index].is_ascii_digit())
        && {
            let hours = (bytes[0] - b'0') * 10 + (bytes[1] - b'0');
            let minutes = (bytes[3] - b'0') * 10 + (bytes[4] - b'0');
            hours < 24 && minutes < 60
        };

    if !valid {
        return Err(InputRejection::new(
            "time",
            RejectionReason::Malformed,
            format!("`{trimmed}` is not a valid time. Please use 24-hour HH:MM, for example 14:30."),
        ));
    }

    Ok(trimmed.to_string())
}

/// Phone-like handle: optional leading `+` followed by 7 to 15 digits.
pub fn parse_phone_handle(input: &str) -> Result<String, InputRejection> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InputRejection::new(
            "customer_handle",
            RejectionReason::Missing,
            "customer handle is required",
        ));
    }

    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let valid = (7..=15).contains(&digits.len()) && digits.bytes().all(|byte| byte.is_ascii_digit());
    if !valid {
        return Err(InputRejection::new(
            "customer_handle",
            RejectionReason::Malformed,
            format!("customer handle `{trimmed}` is not a phone number"),
        ));
    }

    Ok(trimmed.to_string())
}

/// Resolves a customer's choice against the active offerings. Numbers index
/// into the list the customer was shown (1-based); anything else is matched
/// as a case-insensitive substring of the offering name.
pub fn choose_offering<'a>(
    input: &str,
    listed: &[OfferingId],
    active: &'a [Offering],
) -> Result<&'a Offering, InputRejection> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(offering_not_found());
    }

    if let Ok(index) = trimmed.parse::<usize>() {
        let found = if listed.is_empty() {
            index.checked_sub(1).and_then(|position| active.get(position))
        } else {
            index
                .checked_sub(1)
                .and_then(|position| listed.get(position))
                .and_then(|id| active.iter().find(|offering| &offering.id == id))
        };
        return found.ok_or_else(offering_not_found);
    }

    let needle = trimmed.to_lowercase();
    active
        .iter()
        .find(|offering| offering.name.to_lowercase().contains(&needle))
        .ok_or_else(offering_not_found)
}

pub fn choose_offering_by_selection<'a>(
    selection_id: &str,
    active: &'a [Offering],
) -> Result<&'a Offering, InputRejection> {
    selection_id
        .strip_prefix(OFFERING_SELECTION_PREFIX)
        .and_then(|id| active.iter().find(|offering| offering.id.0 == id))
        .ok_or_else(offering_not_found)
}

fn offering_not_found() -> InputRejection {
    InputRejection::new(
        "service",
        RejectionReason::NotFound,
        "Sorry, I could not match that to one of our services. Reply with a number from the list or part of the name.",
    )
}

pub fn classify_payment_reply(
    text: Option<&str>,
    selection_id: Option<&str>,
    confirm_keywords: &[String],
    cancel_keywords: &[String],
) -> PaymentReply {
    match selection_id {
        Some(CONFIRM_SELECTION_ID) => return PaymentReply::Confirm,
        Some(CANCEL_SELECTION_ID) => return PaymentReply::Cancel,
        _ => {}
    }

    let Some(text) = text else {
        return PaymentReply::Unclear;
    };
    let tokens = tokenize(text);
    let confirm = tokens.iter().any(|token| confirm_keywords.iter().any(|kw| kw == token));
    let cancel = tokens.iter().any(|token| cancel_keywords.iter().any(|kw| kw == token));

    match (confirm, cancel) {
        (true, false) => PaymentReply::Confirm,
        (false, true) => PaymentReply::Cancel,
        _ => PaymentReply::Unclear,
    }
}

pub fn detect_booking_intent(text: &str, keywords: &[String]) -> bool {
    tokenize(text).iter().any(|token| keywords.iter().any(|kw| kw == token))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpressBooking<'a> {
    pub offering: &'a Offering,
    pub date: NaiveDate,
    pub slot: String,
}

/// Parses a one-message booking such as `2 2026-11-02 14:30` or
/// `massage 2026-11-02 14:30`. Every problem is reported, not just the first.
pub fn parse_express_booking<'a>(
    text: &str,
    listed: &[OfferingId],
    active: &'a [Offering],
    now: DateTime<Utc>,
) -> Result<ExpressBooking<'a>, Vec<InputRejection>> {
    let mut date_token = None;
    let mut slot_token = None;
    let mut rest = Vec::new();

    for token in text.split_whitespace() {
        if date_token.is_none() && token.len() == 10 && token.matches('-').count() == 2 {
            date_token = Some(token);
        } else if slot_token.is_none() && token.contains(':') {
            slot_token = Some(token);
        } else {
            rest.push(token);
        }
    }

    let offering = choose_offering(&rest.join(" "), listed, active);
    let date = parse_future_date(date_token.unwrap_or_default(), now);
    let slot = parse_slot(slot_token.unwrap_or_default());

    match (offering, date, slot) {
        (Ok(offering), Ok(date), Ok(slot)) => Ok(ExpressBooking { offering, date, slot }),
        (offering, date, slot) => Err([offering.err(), date.err(), slot.err()]
            .into_iter()
            .flatten()
            .collect()),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{
        choose_offering, choose_offering_by_selection, classify_payment_reply,
        detect_booking_intent, parse_express_booking, parse_future_date, parse_phone_handle,
        parse_slot, PaymentReply, RejectionReason,
    };
    use crate::domain::offering::{Offering, OfferingId};
    use crate::domain::tenant::TenantId;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z").expect("rfc3339").with_timezone(&Utc)
    }

    fn offering(id: &str, name: &str) -> Offering {
        Offering {
            id: OfferingId(id.to_string()),
            tenant_id: TenantId("t-1".to_string()),
            name: name.to_string(),
            price: Decimal::new(2500, 2),
            duration_minutes: 30,
            active: true,
        }
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|word| word.to_string()).collect()
    }

    #[test]
    fn future_date_must_be_strictly_after_today() {
        assert_eq!(
            parse_future_date("2026-10-20", now()),
            Ok(NaiveDate::from_ymd_opt(2026, 10, 20).expect("date"))
        );
        let today = parse_future_date("2026-10-19", now()).expect_err("today is not future");
        assert_eq!(today.reason, RejectionReason::InPast);
        let past = parse_future_date("2020-01-01", now()).expect_err("past");
        assert!(past.message.contains("future date"));
    }

    #[test]
    fn malformed_dates_are_rejected() {
        for input in ["", "tomorrow", "2026-2-01", "2026/11/02", "2026-13-01", "2026-02-30"] {
            let rejection = parse_future_date(input, now()).expect_err(input);
            assert_ne!(rejection.reason, RejectionReason::InPast, "{input}");
            assert!(rejection.message.contains("YYYY-MM-DD"), "{input}");
        }
    }

    #[test]
    fn slot_requires_two_digit_24_hour_time() {
        assert_eq!(parse_slot(" 09:05 "), Ok("09:05".to_string()));
        assert_eq!(parse_slot("23:59"), Ok("23:59".to_string()));
        for input in ["24:00", "9:05", "12:60", "1230", "ab:cd", ""] {
            assert!(parse_slot(input).is_err(), "{input}");
        }
    }

    #[test]
    fn phone_handles_accept_optional_plus_and_digits_only() {
        assert!(parse_phone_handle("+15551234567").is_ok());
        assert!(parse_phone_handle("5551234").is_ok());
        assert!(parse_phone_handle("555-1234").is_err());
        assert!(parse_phone_handle("123").is_err());
        assert_eq!(
            parse_phone_handle(" ").expect_err("blank").reason,
            RejectionReason::Missing
        );
    }

    #[test]
    fn numeric_choice_indexes_the_listed_offerings() {
        let active = vec![offering("o-1", "Haircut"), offering("o-2", "Massage")];
        let listed = vec![OfferingId("o-1".to_string()), OfferingId("o-2".to_string())];

        assert_eq!(choose_offering("2", &listed, &active).map(|o| o.name.as_str()), Ok("Massage"));
        assert!(choose_offering("0", &listed, &active).is_err());
        assert!(choose_offering("3", &listed, &active).is_err());
    }

    #[test]
    fn numeric_choice_skips_offerings_deactivated_since_listing() {
        let active = vec![offering("o-2", "Massage")];
        let listed = vec![OfferingId("o-1".to_string()), OfferingId("o-2".to_string())];

        assert!(choose_offering("1", &listed, &active).is_err());
        assert_eq!(choose_offering("2", &listed, &active).map(|o| o.id.0.as_str()), Ok("o-2"));
    }

    #[test]
    fn name_choice_is_case_insensitive_substring() {
        let active = vec![offering("o-1", "Haircut"), offering("o-2", "Deep Tissue Massage")];

        assert_eq!(choose_offering("MASSAGE", &[], &active).map(|o| o.id.0.as_str()), Ok("o-2"));
        assert_eq!(choose_offering("hair", &[], &active).map(|o| o.id.0.as_str()), Ok("o-1"));
        assert!(choose_offering("nails", &[], &active).is_err());
    }

    #[test]
    fn selection_ids_resolve_offerings() {
        let active = vec![offering("o-1", "Haircut")];
        assert!(choose_offering_by_selection("offering:o-1", &active).is_ok());
        assert!(choose_offering_by_selection("o-1", &active).is_err());
    }

    #[test]
    fn payment_reply_classification_uses_whole_words() {
        let confirm = keywords(&["confirm", "yes"]);
        let cancel = keywords(&["cancel", "no"]);

        let classify = |text: &str| classify_payment_reply(Some(text), None, &confirm, &cancel);
        assert_eq!(classify("Yes please!"), PaymentReply::Confirm);
        assert_eq!(classify("cancel it"), PaymentReply::Cancel);
        assert_eq!(classify("yes... no"), PaymentReply::Unclear);
        assert_eq!(classify("nothing"), PaymentReply::Unclear);
        assert_eq!(
            classify_payment_reply(None, Some("confirm"), &confirm, &cancel),
            PaymentReply::Confirm
        );
    }

    #[test]
    fn booking_intent_detection() {
        let words = keywords(&["book", "appointment"]);
        assert!(detect_booking_intent("I'd like to book a massage", &words));
        assert!(!detect_booking_intent("bookkeeping question", &words));
    }

    #[test]
    fn express_booking_collects_every_problem() {
        let active = vec![offering("o-1", "Haircut"), offering("o-2", "Massage")];

        let parsed = parse_express_booking("massage 2026-11-02 14:30", &[], &active, now())
            .expect("complete express booking");
        assert_eq!(parsed.offering.id.0, "o-2");
        assert_eq!(parsed.slot, "14:30");

        let problems = parse_express_booking("nails 2020-01-01 25:00", &[], &active, now())
            .expect_err("three problems");
        let fields = problems.iter().map(|problem| problem.field).collect::<Vec<_>>();
        assert_eq!(fields, vec!["service", "date", "time"]);
    }
}
