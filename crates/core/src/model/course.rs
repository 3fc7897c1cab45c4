use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{CourseId, LessonId, QuizId, TopicId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("course length must be at least one day")]
    InvalidLength,

    #[error("duplicate {level} order {order} under parent {parent}")]
    DuplicateOrder {
        level: &'static str,
        parent: u64,
        order: u32,
    },

    #[error("duplicate {level} id {id}")]
    DuplicateId { level: &'static str, id: u64 },

    #[error("course cannot register itself as its next course")]
    SelfReferencingNextCourse,
}

//
// ─── TREE ──────────────────────────────────────────────────────────────────────
//

/// Assessment leaf of the course tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub order: u32,
    pub title: String,
    pub question_count: u32,
}

impl Quiz {
    /// Quizzes without questions never count toward progress.
    #[must_use]
    pub fn is_gating(&self) -> bool {
        self.question_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub order: u32,
    pub title: String,
    pub quizzes: Vec<Quiz>,
}

impl Topic {
    pub fn gating_quizzes(&self) -> impl Iterator<Item = &Quiz> {
        self.quizzes.iter().filter(|q| q.is_gating())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub order: u32,
    pub title: String,
    pub topics: Vec<Topic>,
}

impl Lesson {
    pub fn gating_quizzes(&self) -> impl Iterator<Item = &Quiz> {
        self.topics.iter().flat_map(Topic::gating_quizzes)
    }

    #[must_use]
    pub fn has_gating_quizzes(&self) -> bool {
        self.gating_quizzes().next().is_some()
    }
}

/// Descriptive attributes of a course, without its tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseInfo {
    pub id: CourseId,
    pub title: String,
    pub category: Option<String>,
    pub length_days: u32,
    pub auto_register_next_course: bool,
    pub next_course_id: Option<CourseId>,
    pub is_main_course: bool,
}

/// A course and its ordered lesson → topic → quiz tree.
///
/// Children are kept sorted by `order`, which defines traversal sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    info: CourseInfo,
    lessons: Vec<Lesson>,
}

impl Course {
    /// Builds a validated course tree.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` when the title is blank, the length is zero, an
    /// `order` repeats within a parent, or an id repeats within its level.
    pub fn new(info: CourseInfo, mut lessons: Vec<Lesson>) -> Result<Self, CourseError> {
        if info.title.trim().is_empty() {
            return Err(CourseError::EmptyTitle);
        }
        if info.length_days == 0 {
            return Err(CourseError::InvalidLength);
        }
        if info.next_course_id == Some(info.id) {
            return Err(CourseError::SelfReferencingNextCourse);
        }

        check_orders("lesson", info.id.value(), lessons.iter().map(|l| l.order))?;
        check_ids("lesson", lessons.iter().map(|l| l.id.value()))?;
        check_ids(
            "topic",
            lessons.iter().flat_map(|l| l.topics.iter().map(|t| t.id.value())),
        )?;
        check_ids(
            "quiz",
            lessons
                .iter()
                .flat_map(|l| l.topics.iter())
                .flat_map(|t| t.quizzes.iter().map(|q| q.id.value())),
        )?;

        for lesson in &mut lessons {
            check_orders("topic", lesson.id.value(), lesson.topics.iter().map(|t| t.order))?;
            for topic in &mut lesson.topics {
                check_orders("quiz", topic.id.value(), topic.quizzes.iter().map(|q| q.order))?;
                topic.quizzes.sort_by_key(|q| q.order);
            }
            lesson.topics.sort_by_key(|t| t.order);
        }
        lessons.sort_by_key(|l| l.order);

        Ok(Self { info, lessons })
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.info.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.info.title
    }

    #[must_use]
    pub fn info(&self) -> &CourseInfo {
        &self.info
    }

    #[must_use]
    pub fn length_days(&self) -> u32 {
        self.info.length_days
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    #[must_use]
    pub fn lesson(&self, id: LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == id)
    }

    /// Returns the lesson and topic that own the given quiz.
    #[must_use]
    pub fn locate_quiz(&self, quiz_id: QuizId) -> Option<(&Lesson, &Topic, &Quiz)> {
        self.lessons.iter().find_map(|lesson| {
            lesson.topics.iter().find_map(|topic| {
                topic
                    .quizzes
                    .iter()
                    .find(|q| q.id == quiz_id)
                    .map(|quiz| (lesson, topic, quiz))
            })
        })
    }

    pub fn gating_quizzes(&self) -> impl Iterator<Item = &Quiz> {
        self.lessons.iter().flat_map(Lesson::gating_quizzes)
    }

    #[must_use]
    pub fn gating_quiz_count(&self) -> usize {
        self.gating_quizzes().count()
    }
}

fn check_orders(
    level: &'static str,
    parent: u64,
    orders: impl Iterator<Item = u32>,
) -> Result<(), CourseError> {
    let mut seen = HashSet::new();
    for order in orders {
        if !seen.insert(order) {
            return Err(CourseError::DuplicateOrder {
                level,
                parent,
                order,
            });
        }
    }
    Ok(())
}

fn check_ids(level: &'static str, ids: impl Iterator<Item = u64>) -> Result<(), CourseError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(CourseError::DuplicateId { level, id });
        }
    }
    Ok(())
}

//
// ─── TEST FIXTURES ─────────────────────────────────────────────────────────────
//

/// Compact builders for course trees used across the workspace's tests.
pub mod fixtures {
    use super::*;

    #[must_use]
    pub fn info(id: u64, length_days: u32) -> CourseInfo {
        CourseInfo {
            id: CourseId::new(id),
            title: format!("Course {id}"),
            category: Some("Certificate III".into()),
            length_days,
            auto_register_next_course: false,
            next_course_id: None,
            is_main_course: true,
        }
    }

    #[must_use]
    pub fn quiz(id: u64, order: u32, question_count: u32) -> Quiz {
        Quiz {
            id: QuizId::new(id),
            order,
            title: format!("Quiz {id}"),
            question_count,
        }
    }

    #[must_use]
    pub fn topic(id: u64, order: u32, quizzes: Vec<Quiz>) -> Topic {
        Topic {
            id: TopicId::new(id),
            order,
            title: format!("Topic {id}"),
            quizzes,
        }
    }

    #[must_use]
    pub fn lesson(id: u64, order: u32, topics: Vec<Topic>) -> Lesson {
        Lesson {
            id: LessonId::new(id),
            order,
            title: format!("Lesson {id}"),
            topics,
        }
    }

    /// Two lessons, each with one topic of two quizzes; quiz ids 1..=4, all gating.
    ///
    /// # Panics
    ///
    /// Never in practice: the tree is statically valid.
    #[must_use]
    pub fn two_lesson_course(id: u64) -> Course {
        Course::new(
            info(id, 30),
            vec![
                lesson(10, 1, vec![topic(100, 1, vec![quiz(1, 1, 5), quiz(2, 2, 5)])]),
                lesson(20, 2, vec![topic(200, 1, vec![quiz(3, 1, 5), quiz(4, 2, 5)])]),
            ],
        )
        .expect("fixture course is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn children_are_sorted_by_order() {
        let course = Course::new(
            info(1, 10),
            vec![
                lesson(2, 5, vec![topic(20, 2, vec![]), topic(21, 1, vec![])]),
                lesson(1, 1, vec![]),
            ],
        )
        .unwrap();

        let lesson_ids: Vec<_> = course.lessons().iter().map(|l| l.id.value()).collect();
        assert_eq!(lesson_ids, vec![1, 2]);
        let topic_ids: Vec<_> = course.lessons()[1]
            .topics
            .iter()
            .map(|t| t.id.value())
            .collect();
        assert_eq!(topic_ids, vec![21, 20]);
    }

    #[test]
    fn duplicate_order_within_parent_is_rejected() {
        let err = Course::new(
            info(1, 10),
            vec![lesson(1, 1, vec![topic(10, 1, vec![quiz(1, 3, 1), quiz(2, 3, 1)])])],
        )
        .unwrap_err();
        assert_eq!(
            err,
            CourseError::DuplicateOrder {
                level: "quiz",
                parent: 10,
                order: 3
            }
        );
    }

    #[test]
    fn same_order_in_different_parents_is_fine() {
        let course = Course::new(
            info(1, 10),
            vec![
                lesson(1, 1, vec![topic(10, 1, vec![quiz(1, 1, 1)])]),
                lesson(2, 2, vec![topic(20, 1, vec![quiz(2, 1, 1)])]),
            ],
        );
        assert!(course.is_ok());
    }

    #[test]
    fn duplicate_quiz_id_is_rejected() {
        let err = Course::new(
            info(1, 10),
            vec![
                lesson(1, 1, vec![topic(10, 1, vec![quiz(1, 1, 1)])]),
                lesson(2, 2, vec![topic(20, 1, vec![quiz(1, 1, 1)])]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CourseError::DuplicateId { level: "quiz", id: 1 }));
    }

    #[test]
    fn zero_question_quizzes_are_not_gating() {
        let course = Course::new(
            info(1, 10),
            vec![lesson(1, 1, vec![topic(10, 1, vec![quiz(1, 1, 0), quiz(2, 2, 4)])])],
        )
        .unwrap();
        assert_eq!(course.gating_quiz_count(), 1);
        let (lesson, topic, quiz) = course.locate_quiz(QuizId::new(1)).unwrap();
        assert_eq!(lesson.id, LessonId::new(1));
        assert_eq!(topic.id, TopicId::new(10));
        assert!(!quiz.is_gating());
    }

    #[test]
    fn invalid_info_is_rejected() {
        let mut bad = info(1, 0);
        assert_eq!(
            Course::new(bad.clone(), vec![]).unwrap_err(),
            CourseError::InvalidLength
        );
        bad.length_days = 5;
        bad.next_course_id = Some(CourseId::new(1));
        assert_eq!(
            Course::new(bad, vec![]).unwrap_err(),
            CourseError::SelfReferencingNextCourse
        );
    }
}
