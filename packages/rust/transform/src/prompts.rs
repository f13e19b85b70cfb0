//! Prompt templates for the two transform variants.

use feedloom_shared::TranslateTaskData;

/// System prompt for HTML-preserving translation.
///
/// The model receives serialized markup chunks, so the prompt pins down the
/// two things the pipeline depends on: tags and attributes pass through
/// untouched, and the reply contains nothing but the translated markup.
pub fn translate_system_prompt(data: &TranslateTaskData) -> String {
    let mut prompt = format!(
        "You are a professional translator. Translate the user's content from {origin} to {target}.\n\
         The content is an HTML fragment. Preserve every tag, attribute, and entity exactly as \
         given; translate only the human-readable text between tags.\n\
         Reply with the translated HTML fragment only, with no explanations, no code fences, \
         and no surrounding quotes.",
        origin = data.origin_lang,
        target = data.target_lang,
    );

    if let Some(custom) = &data.custom_prompt {
        prompt.push('\n');
        prompt.push_str(custom);
    }

    prompt
}

/// System prompt for article summarization.
///
/// The reply contract is a single line of JSON so downstream parsing never
/// has to deal with markdown framing.
pub fn summarize_system_prompt(output_lang: &str) -> String {
    format!(
        "You are a news analyst. Summarize the user's article in {output_lang}.\n\
         Reply with a single line of JSON and nothing else, using exactly this shape:\n\
         {{\"title\": string, \"summary\": string, \"key_points\": [string], \
         \"tags\": [string], \"date\": string or null, \"status\": \"success\"}}\n\
         \"title\" is the article title in {output_lang}; \"summary\" is 2-4 sentences; \
         \"key_points\" lists 3-5 takeaways; \"tags\" lists 2-5 topic keywords; \
         \"date\" is the publication date if the article states one, otherwise null.\n\
         If the article cannot be summarized, reply with \
         {{\"title\": \"\", \"summary\": \"\", \"key_points\": [], \"tags\": [], \
         \"date\": null, \"status\": \"error\"}}."
    )
}
