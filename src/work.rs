//! Work items and the lifecycle state machine
use super::error::BillingError;
use super::utils;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A work item's status. The only legal path is
/// Pending -> Completed -> FinalCompleted; FinalCompleted is terminal.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Completed,
    #[n(2)]
    FinalCompleted,
}

impl WorkStatus {
    /// The single legal next status, or None from the terminal state.
    pub fn successor(self) -> Option<WorkStatus> {
        match self {
            WorkStatus::Pending => Some(WorkStatus::Completed),
            WorkStatus::Completed => Some(WorkStatus::FinalCompleted),
            WorkStatus::FinalCompleted => None,
        }
    }
    pub fn is_terminal(self) -> bool {
        self == WorkStatus::FinalCompleted
    }
}

/// One billable unit of work for a client. Fees are integer minor units
/// (paise) and are fixed once payments exist; no operation mutates them.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    #[n(0)]
    pub id: String, // uuid7, bech32 "work_" prefix
    #[n(1)]
    pub client_id: String,
    #[n(2)]
    pub purpose: String,
    #[n(3)]
    pub fees: u64,
    #[n(4)]
    pub status: WorkStatus,
    #[n(5)]
    pub completion_date: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub updated_at: TimeStamp<Utc>,
}

impl WorkItem {
    /// Create a new work item in Pending for the given client.
    pub fn new(client_id: &str, purpose: &str, fees: u64) -> anyhow::Result<Self> {
        if purpose.trim().is_empty() {
            return Err(anyhow::Error::msg("work purpose must not be empty"));
        }

        let now = TimeStamp::new();
        Ok(Self {
            id: utils::new_uuid_to_bech32("work_")?,
            client_id: client_id.to_string(),
            purpose: purpose.to_string(),
            fees,
            status: WorkStatus::Pending,
            completion_date: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Advance the status by exactly one legal step. Sets the completion
    /// date the first time the work leaves Pending.
    pub fn advance_to(&mut self, next: WorkStatus) -> Result<(), BillingError> {
        if self.status.is_terminal() {
            return Err(BillingError::AlreadyFinal);
        }
        if self.status.successor() != Some(next) {
            return Err(BillingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        if self.completion_date.is_none() {
            self.completion_date = Some(TimeStamp::new());
        }
        self.updated_at = TimeStamp::new();
        Ok(())
    }
}
