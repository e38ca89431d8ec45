// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Acquired channel environment issue records.
//!
//! An issue states that a channel held a status for the half-open span
//! `[start_time, end_time)`. Boolean issues feed the interval merge engine,
//! analog issues are persisted as-is.
//!
//! Identity is the `id` alone: two issues with the same bounds and status but
//! different ids are different facts, and equality/hashing follow that rule.

use crate::error::{AceiError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Environment issue types reported by station equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    AmplifierSaturationDetected,
    AuthenticationSealBroken,
    BackupPowerUnstable,
    BeginningDateOutage,
    BeginningTimeOutage,
    CalibrationUnderway,
    Clipped,
    ClockDifferentialInMicroseconds,
    ClockDifferentialTooLarge,
    ClockLocked,
    DataAvailabilityMinimumChannels,
    DataAvailablityGeophysicalChannels,
    DataAvailablityGeophysicalChannelsUnauthenticated,
    EnvLastGpsSyncTime,
    DeadSensorChannel,
    DigitalFilterMayBeCharging,
    DigitizerAnalogInputShorted,
    DigitizerCalibrationLoopBack,
    DigitizingEquipmentOpen,
    DurationOutage,
    EndingDateOutage,
    EndingTimeOutage,
    EndTimeSeriesBlockette,
    EquipmentHousingOpen,
    EquipmentMoved,
    EventInProgress,
    Gap,
    GlitchesDetected,
    GpsReceiverOff,
    GpsReceiverUnlocked,
    LongDataRecord,
    MainPowerFailure,
    MaximumDataTime,
    MeanAmplitude,
    MissionCapabilityStatistic,
    NegativeLeapSecondDetected,
    NumberOfConstantValues,
    NumberOfDataGaps,
    NumberOfSamples,
    OutageComment,
    PercentAuthenticatedDataAvailable,
    PercentDataReceived,
    PercentUnauthenticatedDataAvailable,
    PercentageGeophysicalChannelReceived,
    PositiveLeapSecondDetected,
    QuestionableTimeTag,
    RootMeanSquareAmplitude,
    ShortDataRecord,
    SpikeDetected,
    StartTimeSeriesBlockette,
    StationEventDetrigger,
    StationEventTrigger,
    StationPowerVoltage,
    StationVolumeParityErrorPossiblyPresent,
    TelemetrySynchronizationError,
    TimelyDataAvailability,
    TimingCorrectionApplied,
    VaultDoorOpened,
    ZeroedData,
}

impl IssueType {
    /// Every issue type, in code order.
    pub const ALL: [IssueType; 59] = [
        IssueType::AmplifierSaturationDetected,
        IssueType::AuthenticationSealBroken,
        IssueType::BackupPowerUnstable,
        IssueType::BeginningDateOutage,
        IssueType::BeginningTimeOutage,
        IssueType::CalibrationUnderway,
        IssueType::Clipped,
        IssueType::ClockDifferentialInMicroseconds,
        IssueType::ClockDifferentialTooLarge,
        IssueType::ClockLocked,
        IssueType::DataAvailabilityMinimumChannels,
        IssueType::DataAvailablityGeophysicalChannels,
        IssueType::DataAvailablityGeophysicalChannelsUnauthenticated,
        IssueType::EnvLastGpsSyncTime,
        IssueType::DeadSensorChannel,
        IssueType::DigitalFilterMayBeCharging,
        IssueType::DigitizerAnalogInputShorted,
        IssueType::DigitizerCalibrationLoopBack,
        IssueType::DigitizingEquipmentOpen,
        IssueType::DurationOutage,
        IssueType::EndingDateOutage,
        IssueType::EndingTimeOutage,
        IssueType::EndTimeSeriesBlockette,
        IssueType::EquipmentHousingOpen,
        IssueType::EquipmentMoved,
        IssueType::EventInProgress,
        IssueType::Gap,
        IssueType::GlitchesDetected,
        IssueType::GpsReceiverOff,
        IssueType::GpsReceiverUnlocked,
        IssueType::LongDataRecord,
        IssueType::MainPowerFailure,
        IssueType::MaximumDataTime,
        IssueType::MeanAmplitude,
        IssueType::MissionCapabilityStatistic,
        IssueType::NegativeLeapSecondDetected,
        IssueType::NumberOfConstantValues,
        IssueType::NumberOfDataGaps,
        IssueType::NumberOfSamples,
        IssueType::OutageComment,
        IssueType::PercentAuthenticatedDataAvailable,
        IssueType::PercentDataReceived,
        IssueType::PercentUnauthenticatedDataAvailable,
        IssueType::PercentageGeophysicalChannelReceived,
        IssueType::PositiveLeapSecondDetected,
        IssueType::QuestionableTimeTag,
        IssueType::RootMeanSquareAmplitude,
        IssueType::ShortDataRecord,
        IssueType::SpikeDetected,
        IssueType::StartTimeSeriesBlockette,
        IssueType::StationEventDetrigger,
        IssueType::StationEventTrigger,
        IssueType::StationPowerVoltage,
        IssueType::StationVolumeParityErrorPossiblyPresent,
        IssueType::TelemetrySynchronizationError,
        IssueType::TimelyDataAvailability,
        IssueType::TimingCorrectionApplied,
        IssueType::VaultDoorOpened,
        IssueType::ZeroedData,
    ];

    /// Stable numeric code (1-based).
    pub fn code(self) -> u8 {
        self as u8 + 1
    }

    pub fn from_code(code: u8) -> Option<Self> {
        code.checked_sub(1)
            .and_then(|idx| Self::ALL.get(idx as usize).copied())
    }

    /// Human readable description as reported by station equipment.
    pub fn description(self) -> &'static str {
        match self {
            IssueType::AmplifierSaturationDetected => "amplifier saturation detected",
            IssueType::AuthenticationSealBroken => "authentication seal broken",
            IssueType::BackupPowerUnstable => "backup power unstable",
            IssueType::BeginningDateOutage => "beginning date of outage",
            IssueType::BeginningTimeOutage => "beginning time of outage",
            IssueType::CalibrationUnderway => "calibration underway",
            IssueType::Clipped => "clipped",
            IssueType::ClockDifferentialInMicroseconds => {
                "clock differential in microseconds > threshold"
            }
            IssueType::ClockDifferentialTooLarge => "clock differential too large",
            IssueType::ClockLocked => "clock locked",
            IssueType::DataAvailabilityMinimumChannels => {
                "data availabilty of the minimum channels"
            }
            IssueType::DataAvailablityGeophysicalChannels => {
                "data availability of the geophysical channels"
            }
            IssueType::DataAvailablityGeophysicalChannelsUnauthenticated => {
                "data availability (unauthenticated) of the geophysical channels"
            }
            IssueType::EnvLastGpsSyncTime => "time of last gps synchronization",
            IssueType::DeadSensorChannel => "dead sensor channel",
            IssueType::DigitalFilterMayBeCharging => "digital filter may be charging",
            IssueType::DigitizerAnalogInputShorted => "digitizer analog input shorted",
            IssueType::DigitizerCalibrationLoopBack => "digitizer calibration loop back",
            IssueType::DigitizingEquipmentOpen => "digitizing equipment open",
            IssueType::DurationOutage => "duration of outage",
            IssueType::EndingDateOutage => "date of first sample after outage",
            IssueType::EndingTimeOutage => "time of first sample after outage",
            IssueType::EndTimeSeriesBlockette => "end of time series",
            IssueType::EquipmentHousingOpen => "equipment housing open",
            IssueType::EquipmentMoved => "equipment moved",
            IssueType::EventInProgress => "event in progress",
            IssueType::Gap => "missing/padded data present",
            IssueType::GlitchesDetected => "data quality: glitches detected",
            IssueType::GpsReceiverOff => "GPS receiver off",
            IssueType::GpsReceiverUnlocked => "GPS receiver unlocked",
            IssueType::LongDataRecord => "long record read",
            IssueType::MainPowerFailure => "main power failure",
            IssueType::MaximumDataTime => "maximum data time possible",
            IssueType::MeanAmplitude => "mean amplitude",
            IssueType::MissionCapabilityStatistic => "mission capability of minimum channels",
            IssueType::NegativeLeapSecondDetected => "negative leap second happened",
            IssueType::NumberOfConstantValues => "constant",
            IssueType::NumberOfDataGaps => "gaps",
            IssueType::NumberOfSamples => "samples",
            IssueType::OutageComment => "comment",
            IssueType::PercentAuthenticatedDataAvailable => "percent available",
            IssueType::PercentDataReceived => "percent received",
            IssueType::PercentUnauthenticatedDataAvailable => "percent unauthentic available",
            IssueType::PercentageGeophysicalChannelReceived => {
                "data received percentage of the geophysical channels"
            }
            IssueType::PositiveLeapSecondDetected => "positive leap second happened",
            IssueType::QuestionableTimeTag => "time tag is questionable",
            IssueType::RootMeanSquareAmplitude => "RMS",
            IssueType::ShortDataRecord => "short record read (record padded)",
            IssueType::SpikeDetected => "spikes detected",
            IssueType::StartTimeSeriesBlockette => "start of time series",
            IssueType::StationEventDetrigger => "end of event, station detrigger",
            IssueType::StationEventTrigger => "beginning of event, station trigger",
            IssueType::StationPowerVoltage => "station power voltage",
            IssueType::StationVolumeParityErrorPossiblyPresent => {
                "station volume parity error possibly present"
            }
            IssueType::TelemetrySynchronizationError => "telemetry synchronization error",
            IssueType::TimelyDataAvailability => "timely data availability of minimum channels",
            IssueType::TimingCorrectionApplied => "time correction applied",
            IssueType::VaultDoorOpened => "vault door opened",
            IssueType::ZeroedData => "zeroed data",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Key of one interval timeline: the channel and the issue type it tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub channel_name: String,
    pub issue_type: IssueType,
}

impl ChannelKey {
    pub fn new(channel_name: impl Into<String>, issue_type: IssueType) -> Self {
        Self {
            channel_name: channel_name.into(),
            issue_type,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.channel_name, self.issue_type)
    }
}

fn check_span(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Result<()> {
    if start_time < end_time {
        Ok(())
    } else {
        Err(AceiError::InvalidArgument(format!(
            "start time {} must be before end time {}",
            start_time, end_time
        )))
    }
}

/// A boolean-valued issue: the channel reported `status` over `[start_time, end_time)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooleanIssue {
    id: Uuid,
    channel_name: String,
    issue_type: IssueType,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: bool,
}

impl BooleanIssue {
    pub fn new(
        id: Uuid,
        channel_name: impl Into<String>,
        issue_type: IssueType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: bool,
    ) -> Result<Self> {
        check_span(start_time, end_time)?;
        Ok(Self {
            id,
            channel_name: channel_name.into(),
            issue_type,
            start_time,
            end_time,
            status,
        })
    }

    /// Creates an issue with a freshly generated id.
    pub fn synthesize(
        channel_name: impl Into<String>,
        issue_type: IssueType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: bool,
    ) -> Result<Self> {
        Self::new(
            Uuid::new_v4(),
            channel_name,
            issue_type,
            start_time,
            end_time,
            status,
        )
    }

    /// Fresh-id copy of this issue spanning `[start_time, end_time)`.
    pub fn with_span(&self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Result<Self> {
        Self::synthesize(
            self.channel_name.clone(),
            self.issue_type,
            start_time,
            end_time,
            self.status,
        )
    }

    /// Same issue (same id) starting at `start_time`. Used by retention.
    pub fn truncated_to(&self, start_time: DateTime<Utc>) -> Result<Self> {
        check_span(start_time, self.end_time)?;
        Ok(Self {
            start_time,
            ..self.clone()
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn issue_type(&self) -> IssueType {
        self.issue_type
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.channel_name.clone(), self.issue_type)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn status(&self) -> bool {
        self.status
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// True when the half-open spans share at least one instant.
    pub fn overlaps(&self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> bool {
        self.start_time < end_time && start_time < self.end_time
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start_time <= instant && instant < self.end_time
    }
}

impl PartialEq for BooleanIssue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BooleanIssue {}

impl Hash for BooleanIssue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for BooleanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?}={} [{}, {}) ({})",
            self.channel_name, self.issue_type, self.status, self.start_time, self.end_time, self.id
        )
    }
}

/// An analog-valued issue. Never merged, stored one for one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogIssue {
    id: Uuid,
    channel_name: String,
    issue_type: IssueType,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: f64,
}

impl AnalogIssue {
    pub fn new(
        id: Uuid,
        channel_name: impl Into<String>,
        issue_type: IssueType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: f64,
    ) -> Result<Self> {
        check_span(start_time, end_time)?;
        Ok(Self {
            id,
            channel_name: channel_name.into(),
            issue_type,
            start_time,
            end_time,
            status,
        })
    }

    pub fn synthesize(
        channel_name: impl Into<String>,
        issue_type: IssueType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: f64,
    ) -> Result<Self> {
        Self::new(
            Uuid::new_v4(),
            channel_name,
            issue_type,
            start_time,
            end_time,
            status,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn issue_type(&self) -> IssueType {
        self.issue_type
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn status(&self) -> f64 {
        self.status
    }
}

impl PartialEq for AnalogIssue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AnalogIssue {}

impl Hash for AnalogIssue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_rejects_empty_or_inverted_span() {
        let err = BooleanIssue::synthesize("A.B.C", IssueType::Clipped, at(5), at(5), true);
        assert!(matches!(err, Err(AceiError::InvalidArgument(_))));

        let err = AnalogIssue::synthesize("A.B.C", IssueType::MeanAmplitude, at(6), at(5), 1.5);
        assert!(matches!(err, Err(AceiError::InvalidArgument(_))));
    }

    #[test]
    fn test_identity_is_by_id() {
        let a = BooleanIssue::synthesize("A.B.C", IssueType::Clipped, at(0), at(5), true).unwrap();
        let b = BooleanIssue::synthesize("A.B.C", IssueType::Clipped, at(0), at(5), true).unwrap();
        assert_ne!(a, b);

        let c = BooleanIssue::new(a.id(), "X.Y.Z", IssueType::Gap, at(10), at(20), false).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_with_span_mints_new_id() {
        let a = BooleanIssue::synthesize("A.B.C", IssueType::Clipped, at(0), at(5), true).unwrap();
        let b = a.with_span(at(0), at(9)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(b.end_time(), at(9));
        assert!(b.status());
    }

    #[test]
    fn test_truncated_to_keeps_id() {
        let a = BooleanIssue::synthesize("A.B.C", IssueType::Clipped, at(0), at(5), true).unwrap();
        let t = a.truncated_to(at(3)).unwrap();
        assert_eq!(a.id(), t.id());
        assert_eq!(t.start_time(), at(3));
        assert!(a.truncated_to(at(5)).is_err());
    }

    #[test]
    fn test_overlaps_is_half_open() {
        let a = BooleanIssue::synthesize("A.B.C", IssueType::Clipped, at(0), at(5), true).unwrap();
        assert!(a.overlaps(at(4), at(6)));
        assert!(!a.overlaps(at(5), at(6)));
        assert!(a.contains(at(0)));
        assert!(!a.contains(at(5)));
    }

    #[test]
    fn test_issue_type_codes_round_trip() {
        assert_eq!(IssueType::AmplifierSaturationDetected.code(), 1);
        assert_eq!(IssueType::VaultDoorOpened.code(), 58);
        assert_eq!(IssueType::ZeroedData.code(), 59);
        assert_eq!(IssueType::from_code(32), Some(IssueType::MainPowerFailure));
        assert_eq!(IssueType::from_code(0), None);
        assert_eq!(IssueType::from_code(60), None);
        assert_eq!(IssueType::VaultDoorOpened.to_string(), "vault door opened");
    }

    #[test]
    fn test_issue_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&IssueType::VaultDoorOpened).unwrap();
        assert_eq!(json, "\"VAULT_DOOR_OPENED\"");
        let parsed: IssueType = serde_json::from_str("\"CLOCK_LOCKED\"").unwrap();
        assert_eq!(parsed, IssueType::ClockLocked);
    }
}
