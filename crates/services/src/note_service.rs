use std::sync::Arc;

use lms_core::model::{Note, NoteId, NoteSubject, UserId};
use storage::repository::{NewNoteRecord, NoteRepository};
use tracing::info;

use crate::Clock;
use crate::error::NoteServiceError;

/// Staff notes on companies and students, with a per-subject pin limit.
#[derive(Clone)]
pub struct NoteService {
    clock: Clock,
    notes: Arc<dyn NoteRepository>,
}

impl NoteService {
    #[must_use]
    pub fn new(clock: Clock, notes: Arc<dyn NoteRepository>) -> Self {
        Self { clock, notes }
    }

    /// Create a note and persist it.
    ///
    /// # Errors
    ///
    /// Returns `NoteServiceError::Note` for an empty body.
    /// Returns `NoteServiceError::Storage` if persistence fails.
    pub async fn add(
        &self,
        subject: NoteSubject,
        author_id: UserId,
        body: String,
    ) -> Result<Note, NoteServiceError> {
        let now = self.clock.now();
        let mut note = Note::new(NoteId::new(1), subject, author_id, body.trim(), now)?;
        note.id = self
            .notes
            .insert_new_note(NewNoteRecord::from_note(&note))
            .await?;
        info!(note = %note.id, subject = %subject, "note added");
        Ok(note)
    }

    /// # Errors
    ///
    /// Returns `NoteServiceError::NotFound` for unknown ids, or
    /// `NoteServiceError::Note` when the note is already pinned or the subject
    /// is at its pin limit.
    pub async fn pin(&self, note_id: NoteId, by: UserId) -> Result<Note, NoteServiceError> {
        let mut note = self.load(note_id).await?;
        let pinned = self.notes.count_pinned(note.subject).await?;
        note.pin(pinned, by, self.clock.now())?;
        self.notes.update_note(&note).await?;
        info!(note = %note_id, subject = %note.subject, by = %by, "note pinned");
        Ok(note)
    }

    /// # Errors
    ///
    /// Returns `NoteServiceError::NotFound` for unknown ids, or
    /// `NoteServiceError::Note` when the note is not pinned.
    pub async fn unpin(&self, note_id: NoteId, by: UserId) -> Result<Note, NoteServiceError> {
        let mut note = self.load(note_id).await?;
        note.unpin(by, self.clock.now())?;
        self.notes.update_note(&note).await?;
        info!(note = %note_id, subject = %note.subject, by = %by, "note unpinned");
        Ok(note)
    }

    /// Notes for the subject, pinned first, then newest first.
    ///
    /// # Errors
    ///
    /// Returns `NoteServiceError::Storage` if repository access fails.
    pub async fn list(&self, subject: NoteSubject) -> Result<Vec<Note>, NoteServiceError> {
        let mut notes = self.notes.list_notes(subject).await?;
        // Stable sort keeps the repository's newest-first order within each group.
        notes.sort_by_key(|n| !n.is_pinned());
        Ok(notes)
    }

    /// # Errors
    ///
    /// Returns `NoteServiceError::Storage` if repository access fails.
    pub async fn pinned_count(&self, subject: NoteSubject) -> Result<usize, NoteServiceError> {
        Ok(self.notes.count_pinned(subject).await?)
    }

    async fn load(&self, note_id: NoteId) -> Result<Note, NoteServiceError> {
        self.notes
            .get_note(note_id)
            .await?
            .ok_or(NoteServiceError::NotFound(note_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lms_core::model::{CompanyId, MAX_PINNED_NOTES, NoteError, PinAction};
    use lms_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn service(repo: &InMemoryRepository) -> NoteService {
        NoteService::new(Clock::fixed(fixed_now()), Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn blank_notes_are_rejected() {
        let repo = InMemoryRepository::new();
        let err = service(&repo)
            .add(NoteSubject::Student(UserId::new(1)), UserId::new(9), "   ".into())
            .await
            .unwrap_err();
        assert!(matches!(err, NoteServiceError::Note(NoteError::EmptyBody)));
    }

    #[tokio::test]
    async fn pin_limit_is_per_subject() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let company = NoteSubject::Company(CompanyId::new(1));
        let other = NoteSubject::Company(CompanyId::new(2));

        let mut ids = Vec::new();
        for i in 0..=MAX_PINNED_NOTES {
            ids.push(svc.add(company, UserId::new(9), format!("note {i}")).await.unwrap().id);
        }
        for id in &ids[..MAX_PINNED_NOTES] {
            svc.pin(*id, UserId::new(9)).await.unwrap();
        }
        let err = svc.pin(ids[MAX_PINNED_NOTES], UserId::new(9)).await.unwrap_err();
        assert!(matches!(err, NoteServiceError::Note(NoteError::PinLimit { .. })));

        let elsewhere = svc.add(other, UserId::new(9), "other".into()).await.unwrap();
        svc.pin(elsewhere.id, UserId::new(9)).await.unwrap();

        svc.unpin(ids[0], UserId::new(8)).await.unwrap();
        let pinned = svc.pin(ids[MAX_PINNED_NOTES], UserId::new(9)).await.unwrap();
        assert!(pinned.is_pinned());
        assert_eq!(svc.pinned_count(company).await.unwrap(), MAX_PINNED_NOTES);
    }

    #[tokio::test]
    async fn pin_history_is_recorded() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let subject = NoteSubject::Student(UserId::new(1));
        let note = svc.add(subject, UserId::new(9), "called parent".into()).await.unwrap();

        svc.pin(note.id, UserId::new(9)).await.unwrap();
        let note = svc.unpin(note.id, UserId::new(7)).await.unwrap();
        let actions: Vec<_> = note.pin_log().iter().map(|e| (e.action, e.by)).collect();
        assert_eq!(
            actions,
            vec![
                (PinAction::Pinned, UserId::new(9)),
                (PinAction::Unpinned, UserId::new(7)),
            ]
        );
        let err = svc.unpin(note.id, UserId::new(7)).await.unwrap_err();
        assert!(matches!(err, NoteServiceError::Note(NoteError::NotPinned)));
    }

    #[tokio::test]
    async fn list_puts_pinned_notes_first() {
        let repo = InMemoryRepository::new();
        let subject = NoteSubject::Student(UserId::new(1));
        let mut clock = Clock::fixed(fixed_now());
        let mut ids = Vec::new();
        for body in ["first", "second", "third"] {
            let svc = NoteService::new(clock, Arc::new(repo.clone()));
            ids.push(svc.add(subject, UserId::new(9), body.into()).await.unwrap().id);
            clock.advance(Duration::minutes(1));
        }
        let svc = service(&repo);
        svc.pin(ids[0], UserId::new(9)).await.unwrap();

        let bodies: Vec<_> = svc
            .list(subject)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.body)
            .collect();
        assert_eq!(bodies, vec!["first", "third", "second"]);

        assert!(matches!(
            svc.pin(NoteId::new(404), UserId::new(9)).await.unwrap_err(),
            NoteServiceError::NotFound(_)
        ));
    }
}
