use crate::state::GenerationRequest;

/// Renders the instruction sent to the model for one chapter.
///
/// The chapter line is only included for multi-chapter requests. Nothing is
/// validated here; out-of-range numbers are passed through as given.
pub fn build_prompt(request: &GenerationRequest, chapter_index: u32) -> String {
    let mut prompt = format!(
        "Write a story titled '{}'.\n\
        Main character: {}.\n\
        Genre: {}.\n\
        Tone: {}.\n\
        Length: about {} words.\n",
        request.title, request.character, request.genre, request.tone, request.target_word_length,
    );

    if request.chapter_count > 1 {
        prompt.push_str(&format!(
            "This is chapter {} of {}.\n",
            chapter_index, request.chapter_count
        ));
    }

    prompt.push_str("Make it engaging and creative.");
    prompt
}
