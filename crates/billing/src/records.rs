//! Service record store
//!
//! Append-only log of completed, billable work. A record counts as
//! "uninvoiced" while no invoice item points at it; once linked it drops out
//! of every later uninvoiced query, which is what keeps it from being billed
//! twice.

use std::sync::Arc;

use kennel_shared::line_total_cents;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::access::Caller;
use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    /// Login account linked to this client, if they have one
    pub user_id: Option<Uuid>,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dog {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceType {
    pub id: Uuid,
    pub name: String,
    pub default_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub client_id: Uuid,
    pub dog_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub id: Uuid,
    pub service_type_id: Uuid,
    pub dog_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub service_date: Date,
    pub duration_minutes: i32,
    pub unit_price_cents: i64,
    pub quantity: i32,
    pub adjustment_cents: i64,
    /// `unit_price × quantity + adjustment`
    pub total_cents: i64,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An uninvoiced record joined with the names needed to describe it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillableRecord {
    #[serde(flatten)]
    pub record: ServiceRecord,
    pub service_type_name: String,
    pub dog_name: Option<String>,
}

impl BillableRecord {
    /// `"<service type>[ - <dog>] (<date>)"`
    pub fn description(&self) -> String {
        match &self.dog_name {
            Some(dog) => format!(
                "{} - {} ({})",
                self.service_type_name, dog, self.record.service_date
            ),
            None => format!("{} ({})", self.service_type_name, self.record.service_date),
        }
    }
}

/// Inclusive service-date bounds; either side may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServicePeriod {
    pub start: Option<Date>,
    pub end: Option<Date>,
}

impl ServicePeriod {
    pub fn new(start: Option<Date>, end: Option<Date>) -> BillingResult<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(BillingError::InvalidInput(
                    "periodStart must not be after periodEnd".to_string(),
                ));
            }
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServiceRecord {
    pub service_type_id: Uuid,
    pub dog_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub service_date: Date,
    #[serde(default)]
    pub duration_minutes: i32,
    /// Falls back to the service type's default price
    pub unit_price_cents: Option<i64>,
    pub quantity: Option<i32>,
    #[serde(default)]
    pub adjustment_cents: i64,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct ServiceRecordService {
    store: Arc<dyn BillingStore>,
}

impl ServiceRecordService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Log a delivered service. Admin only.
    pub async fn record_service(
        &self,
        caller: &Caller,
        input: NewServiceRecord,
    ) -> BillingResult<ServiceRecord> {
        caller.require_admin()?;

        if input.dog_id.is_none() && input.booking_id.is_none() {
            return Err(BillingError::InvalidInput(
                "A service record needs a dog or a booking".to_string(),
            ));
        }
        let quantity = input.quantity.unwrap_or(1);
        if quantity < 1 {
            return Err(BillingError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }
        if input.duration_minutes < 0 {
            return Err(BillingError::InvalidInput(
                "durationMinutes must not be negative".to_string(),
            ));
        }

        let service_type = self
            .store
            .find_service_type(input.service_type_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Service type".to_string()))?;

        let dog = match input.dog_id {
            Some(dog_id) => Some(
                self.store
                    .find_dog(dog_id)
                    .await?
                    .ok_or_else(|| BillingError::NotFound("Dog".to_string()))?,
            ),
            None => None,
        };
        let booking = match input.booking_id {
            Some(booking_id) => Some(
                self.store
                    .find_booking(booking_id)
                    .await?
                    .ok_or_else(|| BillingError::NotFound("Booking".to_string()))?,
            ),
            None => None,
        };
        if let (Some(dog), Some(booking)) = (&dog, &booking) {
            if dog.client_id != booking.client_id {
                return Err(BillingError::InvalidInput(
                    "Dog and booking belong to different clients".to_string(),
                ));
            }
        }

        let unit_price_cents = input
            .unit_price_cents
            .unwrap_or(service_type.default_price_cents);
        if unit_price_cents < 0 {
            return Err(BillingError::InvalidInput(
                "unitPriceCents must not be negative".to_string(),
            ));
        }

        let record = ServiceRecord {
            id: Uuid::new_v4(),
            service_type_id: service_type.id,
            dog_id: input.dog_id,
            booking_id: input.booking_id,
            service_date: input.service_date,
            duration_minutes: input.duration_minutes,
            unit_price_cents,
            quantity,
            adjustment_cents: input.adjustment_cents,
            total_cents: line_total_cents(unit_price_cents, quantity, input.adjustment_cents),
            notes: input.notes,
            created_at: OffsetDateTime::now_utc(),
        };

        self.store.insert_service_record(&record).await?;

        tracing::info!(
            record_id = %record.id,
            service_type = %service_type.name,
            total_cents = record.total_cents,
            "Service record logged"
        );

        Ok(record)
    }

    /// Records for `client_id` that no invoice line references yet.
    pub async fn list_uninvoiced(
        &self,
        caller: &Caller,
        client_id: Uuid,
        period: ServicePeriod,
    ) -> BillingResult<Vec<BillableRecord>> {
        caller.require_admin()?;
        self.store
            .find_client(client_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Client".to_string()))?;
        self.store.list_uninvoiced_records(client_id, period).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBillingStore;
    use time::macros::date;

    fn record_input(store: &MemoryBillingStore) -> (NewServiceRecord, Uuid) {
        let client = store.seed_client("Avery Lane", "avery@example.com", None);
        let dog = store.seed_dog(client.id, "Biscuit");
        let service_type = store.seed_service_type("Private lesson", 7000);
        (
            NewServiceRecord {
                service_type_id: service_type.id,
                dog_id: Some(dog.id),
                booking_id: None,
                service_date: date!(2024 - 03 - 02),
                duration_minutes: 60,
                unit_price_cents: None,
                quantity: Some(2),
                adjustment_cents: -500,
                notes: None,
            },
            client.id,
        )
    }

    #[tokio::test]
    async fn test_record_service_computes_total_from_default_price() {
        let store = Arc::new(MemoryBillingStore::new());
        let (input, _) = record_input(&store);
        let service = ServiceRecordService::new(store.clone());

        let record = service
            .record_service(&Caller::admin(Uuid::new_v4()), input)
            .await
            .unwrap();

        assert_eq!(record.unit_price_cents, 7000);
        assert_eq!(record.total_cents, 13500);
    }

    #[tokio::test]
    async fn test_record_service_requires_dog_or_booking() {
        let store = Arc::new(MemoryBillingStore::new());
        let (mut input, _) = record_input(&store);
        input.dog_id = None;
        let service = ServiceRecordService::new(store);

        let err = service
            .record_service(&Caller::admin(Uuid::new_v4()), input)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_record_service_rejects_dog_and_booking_of_different_clients() {
        let store = Arc::new(MemoryBillingStore::new());
        let (mut input, owner_id) = record_input(&store);
        let other = store.seed_client("Blair", "blair@example.com", None);
        input.booking_id = Some(store.seed_booking(other.id, None).id);
        let service = ServiceRecordService::new(store.clone());
        let admin = Caller::admin(Uuid::new_v4());

        let err = service.record_service(&admin, input.clone()).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));

        // Same client on both sides is fine.
        input.booking_id = Some(store.seed_booking(owner_id, input.dog_id).id);
        service.record_service(&admin, input).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_service_is_admin_only() {
        let store = Arc::new(MemoryBillingStore::new());
        let (input, _) = record_input(&store);
        let service = ServiceRecordService::new(store);

        let err = service
            .record_service(&Caller::client(Uuid::new_v4()), input)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Forbidden));
    }

    #[tokio::test]
    async fn test_list_uninvoiced_respects_period() {
        let store = Arc::new(MemoryBillingStore::new());
        let (input, client_id) = record_input(&store);
        let service = ServiceRecordService::new(store.clone());
        let admin = Caller::admin(Uuid::new_v4());

        let mut later = input.clone();
        later.service_date = date!(2024 - 04 - 10);
        service.record_service(&admin, input).await.unwrap();
        service.record_service(&admin, later).await.unwrap();

        let march = ServicePeriod::new(Some(date!(2024 - 03 - 01)), Some(date!(2024 - 03 - 31)))
            .unwrap();
        let records = service.list_uninvoiced(&admin, client_id, march).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description(), "Private lesson - Biscuit (2024-03-02)");

        let all = service
            .list_uninvoiced(&admin, client_id, ServicePeriod::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_period_rejects_inverted_bounds() {
        assert!(ServicePeriod::new(Some(date!(2024 - 03 - 15)), Some(date!(2024 - 03 - 02))).is_err());
        let open_end = ServicePeriod::new(Some(date!(2024 - 03 - 02)), None).unwrap();
        assert!(open_end.contains(date!(2030 - 01 - 01)));
        assert!(!open_end.contains(date!(2024 - 03 - 01)));
    }
}
