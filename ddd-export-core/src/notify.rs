//! Mail composition for exported archives. Transport lives with the
//! [`Notifier`](crate::contract::Notifier) implementation.

use chrono::NaiveDate;

use crate::archive::BuiltArchive;
use crate::contract::{OutgoingMail, Vehicle};

pub const MAIL_BODY: &str = "Automated tachograph (DDD) export.";

/// `{label}_{yyyy-mm-dd}.zip`, label being the registration or the name.
pub fn attachment_name(vehicle: &Vehicle, date: NaiveDate) -> String {
    format!("{}_{}.zip", vehicle.label(), date.format("%Y-%m-%d"))
}

pub fn subject(vehicle: &Vehicle, date: NaiveDate) -> String {
    format!("DDD {} {}", vehicle.label(), date.format("%d.%m.%Y"))
}

pub fn compose(vehicle: &Vehicle, date: NaiveDate, recipients: &str, archive: &BuiltArchive) -> OutgoingMail {
    OutgoingMail {
        subject: subject(vehicle, date),
        recipients: recipients.to_string(),
        body: MAIL_BODY.to_string(),
        attachment_name: archive.file_name.clone(),
        attachment: archive.bytes.clone(),
    }
}

/// Split a comma-separated recipient list, dropping blanks.
pub fn split_recipients(recipients: &str) -> Vec<String> {
    recipients
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
