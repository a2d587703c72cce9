//! Quiz and question persistence.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Repository, RepositoryError, Result};
use crate::models::{Question, QuestionType, Quiz, QuizStatus};

impl Repository {
    /// Create a quiz in the `generating` state, if and only if no quiz for
    /// this (document, user) is already generating.
    ///
    /// The partial unique index makes this a single atomic conditional
    /// insert; `false` means another quiz won the race (or is still running).
    pub fn try_create_generating(&self, quiz: &Quiz) -> Result<bool> {
        debug_assert_eq!(quiz.status, QuizStatus::Generating);
        let conn = self.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO quizzes (id, user_id, document_id, title, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'generating', ?5, ?6)
            ON CONFLICT (document_id, user_id) WHERE status = 'generating' DO NOTHING
            "#,
            params![
                quiz.id,
                quiz.user_id,
                quiz.document_id,
                quiz.title,
                quiz.created_at.to_rfc3339(),
                quiz.updated_at.to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            tracing::debug!(
                document_id = quiz.document_id,
                user_id = quiz.user_id,
                "quiz already generating, insert skipped"
            );
        }
        Ok(inserted > 0)
    }

    pub fn get_quiz(&self, id: &str) -> Result<Quiz> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, document_id, title, status, created_at, updated_at
                 FROM quizzes WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, user_id, document_id, title, status, created_at, updated_at)) = row else {
            return Err(RepositoryError::NotFound(format!("quiz {id}")));
        };
        Ok(Quiz {
            id,
            user_id,
            document_id,
            title,
            status: QuizStatus::parse(&status)
                .ok_or_else(|| RepositoryError::Corrupt(format!("quiz status {status:?}")))?,
            created_at: super::document::parse_timestamp(&created_at)?,
            updated_at: super::document::parse_timestamp(&updated_at)?,
        })
    }

    pub fn set_quiz_status(&self, id: &str, status: QuizStatus) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE quizzes SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("quiz {id}")));
        }
        tracing::debug!(quiz_id = id, status = status.as_str(), "quiz status");
        Ok(())
    }

    /// Persist a validated question set and mark the quiz ready, atomically.
    ///
    /// Questions and the status flip commit together so a `ready` quiz always
    /// has its full question set.
    pub fn insert_questions_and_ready(&self, quiz_id: &str, questions: &[Question]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for question in questions {
            let choices = serde_json::to_string(&question.choices)
                .expect("choice serialization is infallible");
            tx.execute(
                r#"
                INSERT INTO questions
                    (id, quiz_id, question_index, question_type, prompt, choices,
                     answer_index, explanation, source_ref)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    question.id,
                    question.quiz_id,
                    question.question_index,
                    question.question_type.as_str(),
                    question.prompt,
                    choices,
                    question.answer_index,
                    question.explanation,
                    question.source_ref,
                ],
            )?;
        }
        let updated = tx.execute(
            "UPDATE quizzes SET status = 'ready', updated_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), quiz_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("quiz {quiz_id}")));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn questions_for_quiz(&self, quiz_id: &str) -> Result<Vec<Question>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, quiz_id, question_index, question_type, prompt, choices,
                    answer_index, explanation, source_ref
             FROM questions WHERE quiz_id = ? ORDER BY question_index ASC",
        )?;
        let raw = stmt
            .query_map(params![quiz_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, u8>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut questions = Vec::with_capacity(raw.len());
        for (id, quiz_id, question_index, qtype, prompt, choices, answer_index, explanation, source_ref) in
            raw
        {
            questions.push(Question {
                id,
                quiz_id,
                question_index,
                question_type: QuestionType::parse(&qtype)
                    .ok_or_else(|| RepositoryError::Corrupt(format!("question type {qtype:?}")))?,
                prompt,
                choices: serde_json::from_str(&choices)
                    .map_err(|e| RepositoryError::Corrupt(format!("question choices: {e}")))?,
                answer_index,
                explanation,
                source_ref,
            });
        }
        Ok(questions)
    }

    /// Ready quizzes for a (document, user) pair. Free-tier regeneration
    /// checks use this.
    pub fn ready_quiz_count_for_document(&self, document_id: &str, user_id: &str) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM quizzes
             WHERE document_id = ? AND user_id = ? AND status = 'ready'",
            params![document_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total ready quizzes for a user. Free-tier lifetime quota counts rows
    /// rather than keeping a counter that can drift.
    pub fn ready_quiz_count_for_user(&self, user_id: &str) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM quizzes WHERE user_id = ? AND status = 'ready'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_repository;
    use super::*;
    use crate::models::Document;

    fn setup_document(repo: &Repository, id: &str) {
        repo.create_document(&Document::new(
            id.to_string(),
            "user-1".to_string(),
            "week3.pdf".to_string(),
            "abc".to_string(),
            "application/pdf".to_string(),
        ))
        .unwrap();
    }

    fn question(quiz_id: &str, index: u32) -> Question {
        Question {
            id: format!("q-{index}"),
            quiz_id: quiz_id.to_string(),
            question_index: index,
            question_type: QuestionType::MultipleChoice,
            prompt: format!("Question {index}?"),
            choices: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            answer_index: 2,
            explanation: "because".into(),
            source_ref: None,
        }
    }

    #[test]
    fn only_one_quiz_generating_per_document_user() {
        let (_dir, repo) = test_repository();
        setup_document(&repo, "doc-1");

        let first = Quiz::new("user-1".into(), "doc-1".into(), "Quiz".into());
        let second = Quiz::new("user-1".into(), "doc-1".into(), "Quiz".into());
        assert!(repo.try_create_generating(&first).unwrap());
        assert!(!repo.try_create_generating(&second).unwrap());

        // A different user is unaffected
        let other = Quiz::new("user-2".into(), "doc-1".into(), "Quiz".into());
        assert!(repo.try_create_generating(&other).unwrap());

        // Once the first completes, a new generation may start
        repo.set_quiz_status(&first.id, QuizStatus::Ready).unwrap();
        let third = Quiz::new("user-1".into(), "doc-1".into(), "Quiz".into());
        assert!(repo.try_create_generating(&third).unwrap());
    }

    #[test]
    fn questions_and_ready_commit_together() {
        let (_dir, repo) = test_repository();
        setup_document(&repo, "doc-1");
        let quiz = Quiz::new("user-1".into(), "doc-1".into(), "Quiz".into());
        repo.try_create_generating(&quiz).unwrap();

        let questions: Vec<Question> = (0..3).map(|i| question(&quiz.id, i)).collect();
        repo.insert_questions_and_ready(&quiz.id, &questions).unwrap();

        let loaded = repo.get_quiz(&quiz.id).unwrap();
        assert_eq!(loaded.status, QuizStatus::Ready);
        let loaded_questions = repo.questions_for_quiz(&quiz.id).unwrap();
        assert_eq!(loaded_questions.len(), 3);
        assert_eq!(loaded_questions[1].prompt, "Question 1?");
        assert_eq!(loaded_questions[1].choices.len(), 4);
    }

    #[test]
    fn duplicate_question_index_rolls_back_and_quiz_stays_generating() {
        let (_dir, repo) = test_repository();
        setup_document(&repo, "doc-1");
        let quiz = Quiz::new("user-1".into(), "doc-1".into(), "Quiz".into());
        repo.try_create_generating(&quiz).unwrap();

        let mut questions: Vec<Question> = (0..2).map(|i| question(&quiz.id, i)).collect();
        questions[1].question_index = 0;
        questions[1].id = "q-dup".into();

        assert!(repo
            .insert_questions_and_ready(&quiz.id, &questions)
            .is_err());
        assert_eq!(
            repo.get_quiz(&quiz.id).unwrap().status,
            QuizStatus::Generating
        );
        assert!(repo.questions_for_quiz(&quiz.id).unwrap().is_empty());
    }

    #[test]
    fn ready_counts() {
        let (_dir, repo) = test_repository();
        setup_document(&repo, "doc-1");
        setup_document(&repo, "doc-2");

        let quiz_a = Quiz::new("user-1".into(), "doc-1".into(), "A".into());
        repo.try_create_generating(&quiz_a).unwrap();
        repo.set_quiz_status(&quiz_a.id, QuizStatus::Ready).unwrap();

        let quiz_b = Quiz::new("user-1".into(), "doc-2".into(), "B".into());
        repo.try_create_generating(&quiz_b).unwrap();
        repo.set_quiz_status(&quiz_b.id, QuizStatus::Failed).unwrap();

        assert_eq!(
            repo.ready_quiz_count_for_document("doc-1", "user-1").unwrap(),
            1
        );
        assert_eq!(
            repo.ready_quiz_count_for_document("doc-2", "user-1").unwrap(),
            0
        );
        assert_eq!(repo.ready_quiz_count_for_user("user-1").unwrap(), 1);
        assert_eq!(repo.ready_quiz_count_for_user("user-2").unwrap(), 0);
    }
}
