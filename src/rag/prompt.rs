use chrono::NaiveDate;

pub const NOT_IN_NOTES: &str = "The answer is not in the provided notes.";
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// An assembled prompt plus whether it is grounded in retrieved notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub text: String,
    pub from_notes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    max_context_chars: Option<usize>,
}

impl PromptBuilder {
    pub fn new(max_context_chars: Option<usize>) -> Self {
        Self { max_context_chars }
    }

    /// Build a grounded prompt when any passage has content, otherwise a
    /// general-knowledge prompt. Both carry `today` as the current date.
    pub fn build<S: AsRef<str>>(
        &self,
        question: &str,
        passages: &[S],
        today: NaiveDate,
    ) -> BuiltPrompt {
        let usable: Vec<&str> = passages
            .iter()
            .map(|passage| passage.as_ref().trim())
            .filter(|passage| !passage.is_empty())
            .collect();

        let mut context = usable.join(CONTEXT_SEPARATOR);
        if let Some(limit) = self.max_context_chars {
            if let Some((cut, _)) = context.char_indices().nth(limit) {
                context.truncate(cut);
            }
        }

        // Grounded only when some context survives the cap.
        if context.trim().is_empty() {
            return BuiltPrompt {
                text: general_prompt(question.trim(), today),
                from_notes: false,
            };
        }

        BuiltPrompt {
            text: grounded_prompt(question.trim(), &context, today),
            from_notes: true,
        }
    }
}

fn grounded_prompt(question: &str, context: &str, today: NaiveDate) -> String {
    format!(
        "You are a helpful assistant with access to my personal notes.\n\
         Today's date is {date}.\n\
         \n\
         Answer the question as accurately as possible using only the information provided \
         in the context below. Do not guess and do not make anything up. If the context does \
         not contain the answer, respond with: \"{refusal}\"\n\
         \n\
         ---\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         ---\n\
         \n\
         Question:\n\
         {question}\n",
        date = today.format("%A, %B %-d, %Y"),
        refusal = NOT_IN_NOTES,
    )
}

fn general_prompt(question: &str, today: NaiveDate) -> String {
    format!(
        "You are a helpful assistant.\n\
         Today's date is {date}.\n\
         \n\
         None of my personal notes are relevant to this question. Answer it from your own \
         general knowledge; you are free to draw on anything you know.\n\
         \n\
         Question:\n\
         {question}\n",
        date = today.format("%A, %B %-d, %Y"),
    )
}
