use super::super::Model;
use yew::prelude::*;

const UNKNOWN_DISEASE: &str = "Unknown Disease";

pub fn render_results(model: &Model) -> Html {
    let Some(disease) = model.disease() else {
        return html! {};
    };

    let healthy = disease.to_ascii_lowercase().contains("healthy");
    let class = classes!(
        "results-panel",
        healthy.then_some("healthy"),
        (disease == UNKNOWN_DISEASE).then_some("unknown")
    );

    html! {
        <div id="results" class={class}>
            <h2>{"Result"}</h2>
            <p class="disease-name">
                <strong>{"Detected: "}</strong>{ display_name(disease) }
            </p>
            {
                if healthy {
                    html! { <p class="hint">{"No disease detected on this leaf."}</p> }
                } else if disease == UNKNOWN_DISEASE {
                    html! { <p class="hint">{"The model picked a class with no known label."}</p> }
                } else {
                    html! {}
                }
            }
        </div>
    }
}

/// Label files use `Tomato_Late_blight` style names; underscores read
/// poorly on the page.
fn display_name(label: &str) -> String {
    label.split('_').filter(|part| !part.is_empty()).collect::<Vec<_>>().join(" ")
}
