use super::super::{Model, Msg};
use super::utils::debounce;
use yew::prelude::*;

pub fn render_preview_area(model: &Model, ctx: &Context<Model>) -> Html {
    let Some(image) = model.image() else {
        return html! {};
    };

    let link = ctx.link().clone();

    html! {
        <div id="preview-container">
            <div class="selected-preview">
                <img src={image.data_url.clone()} alt={image.name.clone()} />
                <p class="preview-name">{ &image.name }</p>
            </div>
            <div class="button-container">
                <button
                    id="discard-btn"
                    class="analyze-btn"
                    style="background-color: var(--clear-color);"
                    disabled={model.is_loading()}
                    onclick={debounce(300, {
                        let link = link.clone();
                        move || link.send_message(Msg::Discard)
                    })}
                >
                    <i class="fa-solid fa-trash"></i>{" Discard"}
                </button>
                <button
                    id="find-disease-btn"
                    class="analyze-btn"
                    disabled={model.is_loading()}
                    onclick={debounce(300, move || link.send_message(Msg::FindDisease))}
                >
                    { render_find_button_content(model) }
                </button>
            </div>
        </div>
    }
}

fn render_find_button_content(model: &Model) -> Html {
    if model.is_loading() {
        html! { <><span class="spinner"></span>{" Analyzing..."}</> }
    } else {
        html! { <><i class="fa-solid fa-magnifying-glass"></i>{" Find Disease"}</> }
    }
}
