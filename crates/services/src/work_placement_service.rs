use std::sync::Arc;

use chrono::NaiveDate;
use lms_core::model::{CourseId, UserId, WorkPlacement, WorkPlacementId, WorkPlacementUpdate};
use storage::repository::WorkPlacementRepository;
use tracing::info;

use crate::Clock;
use crate::error::WorkPlacementServiceError;

/// Fields captured when a placement is first recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlacement {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub employer_name: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct WorkPlacementService {
    clock: Clock,
    placements: Arc<dyn WorkPlacementRepository>,
}

impl WorkPlacementService {
    #[must_use]
    pub fn new(clock: Clock, placements: Arc<dyn WorkPlacementRepository>) -> Self {
        Self { clock, placements }
    }

    /// # Errors
    ///
    /// Returns `WorkPlacementServiceError::Placement` for a blank employer or
    /// inverted dates, `Storage` if persistence fails.
    pub async fn create(
        &self,
        new: NewPlacement,
    ) -> Result<WorkPlacement, WorkPlacementServiceError> {
        let mut placement = WorkPlacement {
            id: WorkPlacementId::new(1),
            user_id: new.user_id,
            course_id: new.course_id,
            employer_name: new.employer_name.trim().to_string(),
            contact_name: new.contact_name,
            contact_email: new.contact_email,
            contact_phone: new.contact_phone,
            start_date: new.start_date,
            end_date: new.end_date,
            field_changes: Vec::new(),
            created_at: self.clock.now(),
        };
        placement.validate()?;
        placement.id = self.placements.insert_new_placement(&placement).await?;
        info!(placement = %placement.id, user = %placement.user_id, "work placement created");
        Ok(placement)
    }

    /// Applies a partial edit, appending one field-change entry per changed field.
    ///
    /// # Errors
    ///
    /// Returns `WorkPlacementServiceError::NotFound` for unknown ids and
    /// `Placement` if the edit would leave the placement invalid.
    pub async fn update(
        &self,
        id: WorkPlacementId,
        update: WorkPlacementUpdate,
        by: UserId,
    ) -> Result<WorkPlacement, WorkPlacementServiceError> {
        let mut placement = self
            .placements
            .get_placement(id)
            .await?
            .ok_or(WorkPlacementServiceError::NotFound(id))?;
        let changed = placement.apply(update, by, self.clock.now())?;
        if changed > 0 {
            self.placements.update_placement(&placement).await?;
            info!(placement = %id, by = %by, changed, "work placement updated");
        }
        Ok(placement)
    }

    /// # Errors
    ///
    /// Returns `WorkPlacementServiceError::Storage` if repository access fails.
    pub async fn list(&self, user_id: UserId) -> Result<Vec<WorkPlacement>, WorkPlacementServiceError> {
        Ok(self.placements.list_placements(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::model::WorkPlacementError;
    use lms_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_placement() -> NewPlacement {
        NewPlacement {
            user_id: UserId::new(1),
            course_id: CourseId::new(1),
            employer_name: " Little Steps Childcare ".into(),
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            start_date: Some(date(2024, 2, 1)),
            end_date: None,
        }
    }

    #[tokio::test]
    async fn create_trims_and_validates() {
        let repo = InMemoryRepository::new();
        let svc = WorkPlacementService::new(fixed_clock(), Arc::new(repo.clone()));

        let created = svc.create(new_placement()).await.unwrap();
        assert_eq!(created.employer_name, "Little Steps Childcare");
        assert_eq!(svc.list(UserId::new(1)).await.unwrap(), vec![created]);

        let err = svc
            .create(NewPlacement {
                end_date: Some(date(2024, 1, 1)),
                ..new_placement()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkPlacementServiceError::Placement(WorkPlacementError::EndBeforeStart { .. })
        ));
    }

    #[tokio::test]
    async fn updates_record_changed_fields_only() {
        let repo = InMemoryRepository::new();
        let svc = WorkPlacementService::new(fixed_clock(), Arc::new(repo.clone()));
        let created = svc.create(new_placement()).await.unwrap();

        let updated = svc
            .update(
                created.id,
                WorkPlacementUpdate {
                    employer_name: Some("Little Steps Childcare".into()),
                    contact_name: Some(Some("Jo".into())),
                    ..WorkPlacementUpdate::default()
                },
                UserId::new(5),
            )
            .await
            .unwrap();
        assert_eq!(updated.field_changes.len(), 1);
        assert_eq!(updated.field_changes[0].field, "contact_name");
        assert_eq!(updated.field_changes[0].by, UserId::new(5));

        let err = svc
            .update(WorkPlacementId::new(99), WorkPlacementUpdate::default(), UserId::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkPlacementServiceError::NotFound(_)));
    }
}
