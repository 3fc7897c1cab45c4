//! Course progress aggregation over the lesson → topic → quiz tree.
//!
//! Counting rules:
//! - quizzes with zero questions are invisible to every counter;
//! - a quiz counts as passed when it passed or when its topic or lesson was
//!   explicitly marked passed;
//! - a topic or lesson is complete when marked passed or when all of its
//!   gating children are complete. A node without gating children is complete
//!   only when its own recorded status says so.

use serde::Serialize;

use crate::model::{
    Course, Lesson, LessonProgress, NodeStatus, Percentage, ProgressDetails, QuizStatus, Topic,
    TopicProgress,
};

/// Named counters for one level of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Counter {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub submitted: usize,
    /// Items with a final evaluation: `passed + failed`.
    pub processed: usize,
}

impl Counter {
    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Submitted => self.submitted += 1,
            Outcome::Pending { .. } => {}
        }
        self.processed = self.passed + self.failed;
    }
}

/// Aggregator output for one (student, course) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSummary {
    pub lessons: Counter,
    pub topics: Counter,
    pub quizzes: Counter,
    pub percentage: Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Passed,
    Failed,
    Submitted,
    Pending { touched: bool },
}

impl Outcome {
    fn from_quiz(status: QuizStatus) -> Self {
        if status.is_passed() {
            Outcome::Passed
        } else if status.is_failed() {
            Outcome::Failed
        } else if status.is_submitted() {
            Outcome::Submitted
        } else {
            Outcome::Pending {
                touched: status.is_touched(),
            }
        }
    }

    fn from_recorded(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Completed => Outcome::Passed,
            NodeStatus::NotStarted => Outcome::Pending { touched: false },
            _ => Outcome::Pending { touched: true },
        }
    }

    fn is_touched(self) -> bool {
        !matches!(self, Outcome::Pending { touched: false })
    }

    fn folded(children: &[Outcome]) -> Self {
        if children.iter().all(|o| *o == Outcome::Passed) {
            Outcome::Passed
        } else if children.contains(&Outcome::Failed) {
            Outcome::Failed
        } else if children
            .iter()
            .all(|o| matches!(o, Outcome::Passed | Outcome::Submitted))
        {
            Outcome::Submitted
        } else {
            Outcome::Pending {
                touched: children.iter().any(|o| o.is_touched()),
            }
        }
    }

    fn as_node_status(self) -> NodeStatus {
        match self {
            Outcome::Passed => NodeStatus::Completed,
            Outcome::Failed => NodeStatus::Failed,
            Outcome::Submitted => NodeStatus::Submitted,
            Outcome::Pending { touched: true } => NodeStatus::InProgress,
            Outcome::Pending { touched: false } => NodeStatus::NotStarted,
        }
    }
}

struct Walk {
    summary: ProgressSummary,
    lesson_outcomes: Vec<Outcome>,
    topic_outcomes: Vec<Vec<Outcome>>,
}

fn walk(course: &Course, details: &ProgressDetails) -> Walk {
    let empty_lesson = LessonProgress::default();
    let mut summary = ProgressSummary::default();
    let mut lesson_outcomes = Vec::with_capacity(course.lessons().len());
    let mut topic_outcomes = Vec::with_capacity(course.lessons().len());

    for lesson in course.lessons() {
        let lp = details.lessons.get(&lesson.id).unwrap_or(&empty_lesson);
        let topics = lesson_topics(lesson, lp, &mut summary);
        let outcome = if lp.marked_passed {
            Outcome::Passed
        } else if topics.is_empty() {
            Outcome::from_recorded(lp.status)
        } else {
            Outcome::folded(&topics)
        };
        summary.lessons.record(outcome);
        lesson_outcomes.push(outcome);
        topic_outcomes.push(topics);
    }

    summary.percentage = if summary.quizzes.total > 0 {
        Percentage::from_ratio(summary.quizzes.passed, summary.quizzes.total)
    } else {
        Percentage::from_ratio(summary.lessons.passed, summary.lessons.total)
    };

    Walk {
        summary,
        lesson_outcomes,
        topic_outcomes,
    }
}

fn lesson_topics(lesson: &Lesson, lp: &LessonProgress, summary: &mut ProgressSummary) -> Vec<Outcome> {
    let empty_topic = TopicProgress::default();
    lesson
        .topics
        .iter()
        .map(|topic| {
            let tp = lp.topics.get(&topic.id).unwrap_or(&empty_topic);
            let outcome = topic_outcome(topic, tp, lp.marked_passed, summary);
            summary.topics.record(outcome);
            outcome
        })
        .collect()
}

fn topic_outcome(
    topic: &Topic,
    tp: &TopicProgress,
    lesson_marked: bool,
    summary: &mut ProgressSummary,
) -> Outcome {
    let overridden = lesson_marked || tp.marked_passed;
    let quizzes: Vec<Outcome> = topic
        .gating_quizzes()
        .map(|quiz| {
            let outcome = if overridden {
                Outcome::Passed
            } else {
                let status = tp.quizzes.get(&quiz.id).map(|q| q.status).unwrap_or_default();
                Outcome::from_quiz(status)
            };
            summary.quizzes.record(outcome);
            outcome
        })
        .collect();

    if overridden {
        Outcome::Passed
    } else if quizzes.is_empty() {
        Outcome::from_recorded(tp.status)
    } else {
        Outcome::folded(&quizzes)
    }
}

/// Counts passed/failed/submitted/processed items and derives the percentage.
///
/// Nodes missing from `details` are treated as untouched, so a lagging or
/// empty details tree aggregates to zero instead of failing.
#[must_use]
pub fn aggregate(course: &Course, details: &ProgressDetails) -> ProgressSummary {
    walk(course, details).summary
}

/// Writes derived lesson and topic statuses back into `details`.
///
/// The tree is aligned to the course first. Returns the summary of the
/// refreshed tree.
pub fn refresh_statuses(course: &Course, details: &mut ProgressDetails) -> ProgressSummary {
    details.align_to(course);
    let walked = walk(course, details);

    for ((lesson, outcome), topics) in course
        .lessons()
        .iter()
        .zip(walked.lesson_outcomes)
        .zip(walked.topic_outcomes)
    {
        let Some(lp) = details.lessons.get_mut(&lesson.id) else {
            continue;
        };
        lp.status = outcome.as_node_status();
        for (topic, topic_outcome) in lesson.topics.iter().zip(topics) {
            if let Some(tp) = lp.topics.get_mut(&topic.id) {
                tp.status = topic_outcome.as_node_status();
            }
        }
    }

    walked.summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::course::fixtures::*;
    use crate::model::{LessonId, QuizId, TopicId};

    fn set(details: &mut ProgressDetails, course: &Course, quiz: u64, status: QuizStatus) {
        assert!(details.set_quiz(course, QuizId::new(quiz), status, Some(1), None));
    }

    #[test]
    fn empty_details_aggregate_to_zero() {
        let course = two_lesson_course(1);
        let summary = aggregate(&course, &ProgressDetails::default());
        assert_eq!(summary.quizzes.total, 4);
        assert_eq!(summary.quizzes.passed, 0);
        assert_eq!(summary.lessons.total, 2);
        assert_eq!(summary.percentage, Percentage::ZERO);
    }

    #[test]
    fn counters_follow_quiz_states() {
        let course = two_lesson_course(1);
        let mut details = ProgressDetails::zeroed(&course);
        set(&mut details, &course, 1, QuizStatus::Passed);
        set(&mut details, &course, 2, QuizStatus::Submitted);
        set(&mut details, &course, 3, QuizStatus::Returned);

        let summary = aggregate(&course, &details);
        assert_eq!(summary.quizzes.passed, 1);
        assert_eq!(summary.quizzes.submitted, 1);
        assert_eq!(summary.quizzes.failed, 1);
        assert_eq!(summary.quizzes.processed, 2);
        assert_eq!(summary.percentage.value(), 25);

        assert_eq!(summary.topics.submitted, 1);
        assert_eq!(summary.topics.failed, 1);
        assert_eq!(summary.lessons.submitted, 1);
        assert_eq!(summary.lessons.failed, 1);
        assert_eq!(summary.lessons.passed, 0);
    }

    #[test]
    fn zero_question_quizzes_never_count() {
        let course = Course::new(
            info(1, 10),
            vec![lesson(
                10,
                1,
                vec![topic(100, 1, vec![quiz(1, 1, 3), quiz(2, 2, 0), quiz(3, 3, 0)])],
            )],
        )
        .unwrap();
        let mut details = ProgressDetails::zeroed(&course);
        set(&mut details, &course, 2, QuizStatus::Failed);
        set(&mut details, &course, 3, QuizStatus::Passed);

        let summary = aggregate(&course, &details);
        assert_eq!(summary.quizzes, Counter { total: 1, ..Counter::default() });
        assert_eq!(summary.percentage, Percentage::ZERO);

        set(&mut details, &course, 1, QuizStatus::Passed);
        let summary = aggregate(&course, &details);
        assert_eq!(summary.percentage, Percentage::FULL);
        assert_eq!(summary.lessons.passed, 1);
    }

    #[test]
    fn marked_topic_passes_its_quizzes() {
        let course = two_lesson_course(1);
        let mut details = ProgressDetails::zeroed(&course);
        details.mark_topic_passed(LessonId::new(10), TopicId::new(100));

        let summary = aggregate(&course, &details);
        assert_eq!(summary.quizzes.passed, 2);
        assert_eq!(summary.lessons.passed, 1);
        assert_eq!(summary.percentage.value(), 50);
    }

    #[test]
    fn marked_lesson_overrides_failures() {
        let course = two_lesson_course(1);
        let mut details = ProgressDetails::zeroed(&course);
        set(&mut details, &course, 3, QuizStatus::Failed);
        details.mark_lesson_passed(LessonId::new(20));

        let summary = aggregate(&course, &details);
        assert_eq!(summary.quizzes.failed, 0);
        assert_eq!(summary.lessons.passed, 1);
    }

    #[test]
    fn courses_without_gating_quizzes_fall_back_to_lessons() {
        let course = Course::new(
            info(1, 10),
            vec![
                lesson(10, 1, vec![topic(100, 1, vec![quiz(1, 1, 0)])]),
                lesson(20, 2, vec![topic(200, 1, vec![])]),
                lesson(30, 3, vec![]),
            ],
        )
        .unwrap();
        let mut details = ProgressDetails::zeroed(&course);
        details.complete_topic(LessonId::new(10), TopicId::new(100));

        let summary = aggregate(&course, &details);
        assert_eq!(summary.quizzes.total, 0);
        assert_eq!(summary.lessons.passed, 1);
        assert_eq!(summary.percentage.value(), 33);
    }

    #[test]
    fn refresh_writes_node_statuses() {
        let course = two_lesson_course(1);
        let mut details = ProgressDetails::default();
        details.set_quiz(&course, QuizId::new(1), QuizStatus::Passed, Some(1), None);
        details.set_quiz(&course, QuizId::new(2), QuizStatus::Passed, Some(1), None);
        details.set_quiz(&course, QuizId::new(3), QuizStatus::Attempting, Some(1), None);

        let summary = refresh_statuses(&course, &mut details);
        assert_eq!(summary.percentage.value(), 50);

        let l1 = details.lesson(LessonId::new(10)).unwrap();
        assert_eq!(l1.status, NodeStatus::Completed);
        assert_eq!(l1.topics[&TopicId::new(100)].status, NodeStatus::Completed);
        let l2 = details.lesson(LessonId::new(20)).unwrap();
        assert_eq!(l2.status, NodeStatus::InProgress);
        assert!(details.quiz(LessonId::new(20), TopicId::new(200), QuizId::new(4)).is_some());
    }

    #[test]
    fn percentage_never_regresses_as_quizzes_pass() {
        let course = Course::new(
            info(1, 10),
            vec![
                lesson(10, 1, vec![topic(100, 1, (1..=4).map(|i| quiz(i, i as u32, 2)).collect())]),
                lesson(20, 2, vec![topic(200, 1, (5..=7).map(|i| quiz(i, i as u32, 1)).collect())]),
            ],
        )
        .unwrap();

        let mut details = ProgressDetails::zeroed(&course);
        set(&mut details, &course, 6, QuizStatus::Returned);
        let mut previous = aggregate(&course, &details).percentage;
        for quiz_id in [7, 2, 6, 1, 5, 4, 3] {
            set(&mut details, &course, quiz_id, QuizStatus::Passed);
            let current = aggregate(&course, &details).percentage;
            assert!(current >= previous, "{current} < {previous} after quiz {quiz_id}");
            previous = current;
        }
        assert_eq!(previous, Percentage::FULL);
    }
}
