use yew::prelude::*;

/// Renders the application header
pub fn render_header() -> Html {
    html! {
        <header class="app-header">
            <h1><i class="fa-solid fa-leaf"></i> {" Crop Disease Prediction and Management System"}</h1>
            <p class="subtitle">{"Upload a tomato leaf photo via button, drag & drop, or paste"}</p>
        </header>
    }
}
