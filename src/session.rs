/// The conversation the loop is currently continuing.
///
/// The id only moves when the server reports one; a failed exchange leaves it
/// untouched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChatSession {
    chat_id: Option<String>,
}

impl ChatSession {
    pub fn new(resume: Option<String>) -> Self {
        ChatSession {
            chat_id: resume.filter(|id| !id.is_empty()),
        }
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    /// Records the id from a completed exchange. Returns true if it differs
    /// from the one held before.
    pub fn update(&mut self, reported: Option<String>) -> bool {
        match reported {
            Some(id) if !id.is_empty() && self.chat_id.as_deref() != Some(id.as_str()) => {
                self.chat_id = Some(id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update() {
        let mut session = ChatSession::new(None);
        assert_eq!(session.chat_id(), None);

        assert!(session.update(Some("a".to_string())));
        assert_eq!(session.chat_id(), Some("a"));

        assert!(!session.update(Some("a".to_string())));
        // Absent or empty ids keep the current one.
        assert!(!session.update(None));
        assert!(!session.update(Some(String::new())));
        assert_eq!(session.chat_id(), Some("a"));

        assert!(session.update(Some("b".to_string())));
        assert_eq!(session.chat_id(), Some("b"));
    }

    #[test]
    fn test_resume() {
        assert_eq!(ChatSession::new(Some("x".to_string())).chat_id(), Some("x"));
        assert_eq!(ChatSession::new(Some(String::new())).chat_id(), None);
    }
}
