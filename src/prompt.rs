//! Classification prompt.
//!
//! The template carries the definitions, the confidence scale, two worked
//! examples and the `<JSON>…</JSON>` output contract that
//! [`validation`](crate::validation) relies on. Company fields are appended
//! at the end so the fixed prefix stays identical across calls.

use crate::types::{CATEGORIES, CompanyRecord};

/// Opening tag of the structured result block.
pub const JSON_OPEN: &str = "<JSON>";
/// Closing tag of the structured result block. Also the stop sequence.
pub const JSON_CLOSE: &str = "</JSON>";

const TEMPLATE: &str = r#"You classify French startups that build on generative AI. For every company, reason step by step first, then emit a single structured result.

== TASK ==
1. Think through each criterion below.
2. Write short reasoning with concrete evidence.
3. Output the result as JSON between <JSON> and </JSON> tags.

== CONTEXT ==
The companies come from a startup database, which raises the prior that they are startups. Evaluate each case anyway. France has an active Gen-AI scene (Paris, Lyon, Grenoble, ...) and many French startups operate internationally while keeping French roots.

== DEFINITIONS ==
- Startup: independent product company with its own product, funding and team. Look for product pages, funding rounds, team size, founding date, independence from a larger group.
- Gen-AI startup: the core value proposition relies on LLMs, diffusion models or other generative models (text, image, code, audio generation, agents). Classic ML, analytics or a passing mention of "AI" does not qualify. Consulting shops that apply Gen-AI for clients do not qualify.
- Layer, pick one:
  - Foundational: builds core generative models.
  - Infrastructure: tools or platforms others use to build Gen-AI products (APIs, hosting, evaluation, data tooling).
  - Application: uses Gen-AI to solve a concrete end-user problem.
- Category, pick the closest: {categories}
- France link: headquarters in France, most of the team in France, or clearly French founders.

== CONFIDENCE ==
90-100 multiple strong pieces of evidence; 80-89 clear evidence; 70-79 supportive evidence; 60-69 some evidence; 50-59 weak evidence (use for false answers); 0 only when the field is null.

== RULES ==
- Confidence >= 60 only when the boolean is true.
- When information is truly insufficient: booleans false, layer and category null.
- Prefer false over true on weak evidence; reserve null for no information at all.
- Stealth or pre-product companies: judge from stated intentions and progress.
- The JSON must be valid RFC 8259: double quotes everywhere, no trailing commas, no markdown fences.
- Always wrap the JSON between <JSON> and </JSON>.

== FORMAT ==
### REASONING
Startup evidence: 2-3 bullets.
Gen-AI evidence: 2-3 bullets.
Layer and category: 1-2 bullets.
France evidence: 1-2 bullets.

### RESULT
<JSON>
{"is_startup": <bool>, "is_startup_confidence": <0-100>, "startup_rationale": "<text>",
 "is_gen_ai_startup": <bool>, "is_gen_ai_startup_confidence": <0-100>, "gen_ai_rationale": "<text>",
 "layer": "<Foundational|Infrastructure|Application>" or null, "layer_confidence": <0-100>,
 "category": "<category>" or null, "category_confidence": <0-100>,
 "is_linked_to_france": <bool>, "is_linked_to_france_confidence": <0-100>}
</JSON>

== POSITIVE EXAMPLE ==
Name: Iktos
### REASONING
Startup evidence: SaaS product for molecule design; Series A announced.
Gen-AI evidence: generative models design novel molecular structures.
Layer and category: end-user product for pharma research, Science.
France evidence: Paris headquarters, French founding team.
### RESULT
<JSON>
{"is_startup": true, "is_startup_confidence": 95, "startup_rationale": "SaaS product with Series A funding",
 "is_gen_ai_startup": true, "is_gen_ai_startup_confidence": 90, "gen_ai_rationale": "Generative models for molecule design",
 "layer": "Application", "layer_confidence": 85, "category": "Science", "category_confidence": 88,
 "is_linked_to_france": true, "is_linked_to_france_confidence": 80}
</JSON>

== NEGATIVE EXAMPLE ==
Name: A Kind of Magic
### REASONING
Startup evidence: a newsletter about AI trends, no product, no funding information.
Gen-AI evidence: writes about AI but ships no generative technology.
Layer and category: not applicable.
France evidence: English-only content, no French location.
### RESULT
<JSON>
{"is_startup": false, "is_startup_confidence": 94, "startup_rationale": "Newsletter only, no product",
 "is_gen_ai_startup": false, "is_gen_ai_startup_confidence": 92, "gen_ai_rationale": "Media about AI, no Gen-AI technology",
 "layer": null, "layer_confidence": 0, "category": null, "category_confidence": 0,
 "is_linked_to_france": false, "is_linked_to_france_confidence": 70}
</JSON>

== CLASSIFY ==
Name: {name}
Description (identity check only, do not rely on it for the classification): {description}
"#;

/// Render the full prompt for one company.
///
/// Substitution runs on the fixed template only, so braces or placeholder
/// text inside company fields are passed through verbatim.
pub fn render(company: &CompanyRecord) -> String {
    let (head, tail) = TEMPLATE.split_once("{name}").unwrap_or((TEMPLATE, ""));
    let (middle, end) = tail.split_once("{description}").unwrap_or((tail, ""));
    let head = head.replace("{categories}", &CATEGORIES.join(", "));

    let mut prompt = String::with_capacity(
        head.len() + middle.len() + end.len() + company.name.len() + company.description.len(),
    );
    prompt.push_str(&head);
    prompt.push_str(&company.name);
    prompt.push_str(middle);
    prompt.push_str(&company.description);
    prompt.push_str(end);
    prompt
}

/// Minimal prompt used to check that a credential is accepted.
pub const PROBE: &str = "Hello";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_embeds_name_and_description() {
        let prompt = render(&CompanyRecord::new("Mistral AI", "Open-weight LLMs"));
        assert!(prompt.contains("Name: Mistral AI\n"));
        assert!(prompt.contains("do not rely on it for the classification): Open-weight LLMs\n"));
        assert!(!prompt.contains("{name}"));
        assert!(!prompt.contains("{description}"));
    }

    #[test]
    fn render_lists_every_category() {
        let prompt = render(&CompanyRecord::new("x", "y"));
        assert!(!prompt.contains("{categories}"));
        for category in CATEGORIES {
            assert!(prompt.contains(category), "missing {category}");
        }
    }

    #[test]
    fn render_keeps_placeholder_text_in_fields() {
        let prompt = render(&CompanyRecord::new("{description}", "{name} {categories}"));
        assert!(prompt.contains("Name: {description}\n"));
        assert!(prompt.ends_with("{name} {categories}\n"));
    }

    #[test]
    fn render_with_empty_description() {
        let prompt = render(&CompanyRecord::new("Acme AI", ""));
        assert!(prompt.ends_with("classification): \n"));
    }

    #[test]
    fn template_states_output_contract() {
        assert!(TEMPLATE.contains(JSON_OPEN));
        assert!(TEMPLATE.contains(JSON_CLOSE));
    }
}
