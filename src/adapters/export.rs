use crate::domain::model::Reservation;
use crate::utils::error::Result;
use std::io::Write;

/// 輸出預約清單給管理後台等下游使用
pub fn write_reservations_csv<W: Write>(reservations: &[Reservation], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for reservation in reservations {
        csv_writer.serialize(reservation)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_reservations_json<W: Write>(reservations: &[Reservation], writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, reservations)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{DietitianId, PatientId, ReservationId, ReservationStatus};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn reservation(slot: (u32, u32), status: ReservationStatus) -> Reservation {
        let created_at = Utc.with_ymd_and_hms(2024, 4, 20, 8, 0, 0).unwrap();
        Reservation {
            id: ReservationId::generate(),
            dietitian_id: DietitianId::new("D1"),
            patient_id: PatientId::new("P1"),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            slot_time: NaiveTime::from_hms_opt(slot.0, slot.1, 0).unwrap(),
            status,
            created_at,
            cancelled_at: match status {
                ReservationStatus::Cancelled => Some(created_at),
                ReservationStatus::Confirmed => None,
            },
        }
    }

    #[test]
    fn test_csv_export() {
        let rows = vec![
            reservation((9, 0), ReservationStatus::Confirmed),
            reservation((9, 30), ReservationStatus::Cancelled),
        ];
        let mut buffer = Vec::new();
        write_reservations_csv(&rows, &mut buffer).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "id,dietitian_id,patient_id,date,slot_time,status,created_at,cancelled_at"
        );
        assert!(lines[1].contains(",D1,P1,2024-05-01,09:00,CONFIRMED,"));
        assert!(lines[1].ends_with(','));
        assert!(lines[2].contains(",09:30,CANCELLED,"));
    }

    #[test]
    fn test_json_export() {
        let rows = vec![reservation((10, 0), ReservationStatus::Confirmed)];
        let mut buffer = Vec::new();
        write_reservations_json(&rows, &mut buffer).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed[0]["slot_time"], "10:00");
        assert!(parsed[0]["cancelled_at"].is_null());
    }
}
