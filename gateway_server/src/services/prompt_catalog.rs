//! Prompt text for professional headshots.

pub const BASE_PROMPT: &str = "professional portrait photo shoot, photography, perfect face, solo, high quality, 4k, hd, highly detailed face, perfect eyes, headshot, medium shot";

pub const NEGATIVE_PROMPT: &str = "painting, big chin, tattoos, 3d, cgi, illustration, blur, earings, wedding dress, lowres, text, error, ugly, duplicate, morbid, mutilated, extra fingers, mutated hands, poorly drawn hands, poorly drawn face, mutation, deformed, bad anatomy, bad proportions, extra limbs, cloned face, disfigured, gross proportions, malformed limbs, missing arms, missing legs, extra arms, extra legs, fused fingers, too many fingers, long neck, (4_persons), naked, nsfw, nude, tits sexy, (2_persons), Heterochromia, undressed, explicit, closeup, low neck, cleavage, facing camera, from front, sunglasses, full body";

pub const DEFAULT_ENVIRONMENT: &str = "office";
pub const DEFAULT_STYLE: &str = "suit";

/// Sampler settings applied to every headshot.
pub const STEPS: u32 = 10;
pub const CFG: f64 = 3.0;

pub fn environment_prompt(environment: &str) -> Option<&'static str> {
    let text = match environment {
        "office" => "blurred corporate office background, formal, coorporate photo, linkedin profile portrait, professional lighting, depth of field, detailed indoor office background",
        "studio-white" => "plain white background, formal, coorporate photo, linkedin profile portrait, professional lighting, depth of field",
        "studio-grey" => "grey scale plain background, formal, coorporate photo, linkedin profile portrait, professional lighting, depth of field",
        "studio-color" => "plain color background, formal, professional lighting, coloured background, vibrant color, colorful modern backdrop background",
        "black-white" => "Black background, plain black background, dark background, professional lighting, vintage photo grain, ((classic black and white photo)), black&white, b&w, ((greyscale))",
        "outdoor" => "blurred office outdoor, Corporate Outdoor, formal, coorporate photo, linkedin profile portrait, professional lighting, depth of field, outdoor",
        _ => return None,
    };
    Some(text)
}

pub fn style_prompt(style: &str) -> Option<&'static str> {
    let text = match style {
        "suit" => "wearing a suit, wearing office suit, office shirt, executive",
        "casual" => "wearing casual clothes, casual, formal, modern look, casual look, decontracted",
        "formal" => "Wearing formal clothes, executive clothes, prenium formal wear",
        _ => return None,
    };
    Some(text)
}

/// Positive and negative prompt pair for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub positive: String,
    pub negative: String,
}

/// Build the prompts; unknown environments and styles fall back to the defaults.
pub fn headshot_prompts(environment: &str, style: &str) -> Prompts {
    let env_text = environment_prompt(environment)
        .or_else(|| environment_prompt(DEFAULT_ENVIRONMENT))
        .unwrap_or_default();
    let style_text = style_prompt(style)
        .or_else(|| style_prompt(DEFAULT_STYLE))
        .unwrap_or_default();

    Prompts {
        positive: format!("{BASE_PROMPT}, {env_text}, {style_text}"),
        negative: NEGATIVE_PROMPT.to_string(),
    }
}
