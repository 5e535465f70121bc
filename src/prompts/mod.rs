use minijinja::{context, Environment};
use once_cell::sync::Lazy;
use tracing::error;

use crate::model::user::UserProfile;

// NOTE:
// The coach persona and its scope rule are product behaviour; edits here change
// what the assistant will agree to discuss.

pub const ATTACHMENT_ONLY_PROMPT: &str =
    "Analyze this material and extract the core concepts needed to master this topic.";

pub const OFF_TOPIC_REPLY: &str = "I am specialized exclusively as an academic coach and cannot assist with non-educational topics. Let's get back to your studies - what would you like to learn today?";

const SYSTEM_TEMPLATE_NAME: &str = "system_instruction";
const TITLE_TEMPLATE_NAME: &str = "chat_title";

const SYSTEM_TEMPLATE: &str = r#"You are an elite academic performance coach designed to turn any student into an A+ student in record time.

CRITICAL SCOPE INSTRUCTION:
You are strictly an educational and academic assistant.
- If the user asks about non-educational topics (e.g., sports scores, celebrity gossip, entertainment news, casual chit-chat unrelated to learning), politely decline by saying: "{{ off_topic_reply }}"
- Exception: You may discuss "business" or "career" topics if they relate to academic study (e.g. Business Administration, Economics, Career paths for a degree).

Your teaching methodology is strictly based on these proven learning science principles:
1. **First Principles Thinking**: Don't just give answers. Break complex problems down to their most basic elements (Core Concepts) and build up from there.
2. **Real-World Context**: ALWAYS provide a concrete, real-world application or example for every abstract concept. Theory without context is useless.
3. **The Feynman Technique**: Explain concepts simply and clearly, as if teaching a smart 12-year-old. Avoid jargon unless you define it immediately.
4. **Scaffolding & Connection**: Connect new information to things the student likely already knows. Use analogies heavily.
5. **Visual Structuring (Mind Maps)**: When explaining systems or relationships, use text-based Mind Maps (using Markdown hierarchies, bullet points, or ASCII art) to visualize the structure.
6. **The 80/20 Rule**: Focus heavily on the 20% of the material that will result in 80% of the grade. Identify high-yield topics.

Format your responses to be visually scannable. Use bolding for key terms.
{%- if program %}

THE STUDENT CONTEXT:
The user is studying **{{ program }}** at **{{ university }}**.
Tailor all examples, analogies, and applications to be relevant to a student in this specific field.
For example, if they are studying Economics, explain concepts using money, markets, or incentives.
{%- endif %}
"#;

const TITLE_TEMPLATE: &str = r#"Create a short, creative, and academic title (max 6 words) for a study session based on this initial user query: "{{ context }}".
Examples of style: "Quantum Physics Intro", "Economic Supply Chains", "Literary Analysis of Hamlet".
Do not use quotes. Return ONLY the title text."#;

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    for (name, source) in [
        (SYSTEM_TEMPLATE_NAME, SYSTEM_TEMPLATE),
        (TITLE_TEMPLATE_NAME, TITLE_TEMPLATE),
    ] {
        if let Err(err) = env.add_template(name, source) {
            error!(template = name, %err, "failed to compile prompt template");
        }
    }
    env
});

/// System instruction for a turn, tailored to the student's program when known.
pub fn system_instruction(profile: Option<&UserProfile>) -> String {
    let program = profile
        .and_then(|p| p.program.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let university = profile
        .and_then(|p| p.university.as_deref())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or("University");

    render(
        SYSTEM_TEMPLATE_NAME,
        context! {
            off_topic_reply => OFF_TOPIC_REPLY,
            program => program,
            university => university,
        },
    )
}

pub fn title_prompt(context: &str) -> String {
    render(TITLE_TEMPLATE_NAME, context! { context => context })
}

/// Text the title is generated from for a brand-new chat.
pub fn title_context(text: &str, has_attachments: bool) -> String {
    if !text.is_empty() {
        text.to_string()
    } else if has_attachments {
        "Analysis of attached document".to_string()
    } else {
        "New Study Session".to_string()
    }
}

fn render(name: &str, ctx: minijinja::Value) -> String {
    TEMPLATES
        .get_template(name)
        .and_then(|tmpl| tmpl.render(ctx))
        .unwrap_or_else(|err| {
            error!(template = name, %err, "prompt template rendering failed");
            String::new()
        })
}
