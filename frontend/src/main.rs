mod api;
mod components;

use components::header::render_header;
use components::preview_area::render_preview_area;
use components::results::render_results;
use components::theme_toggle::render_theme_toggle;
use components::upload_section::render_upload_section;
use components::utils::{first_image_file, render_error_message};
use gloo_events::EventListener;
use gloo_file::File as GlooFile;
use gloo_file::callbacks::{FileReader, read_as_data_url};
use gloo_storage::{LocalStorage, Storage};
use shared::PredictResponse;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{ClipboardEvent, DragEvent};
use yew::prelude::*;

const THEME_KEY: &str = "leaf-theme";
const NO_IMAGE_SELECTED: &str = "Please upload, drop or paste an image first.";
const NOT_AN_IMAGE: &str = "Please drop or paste an image file.";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    fn from_storage() -> Self {
        match LocalStorage::get::<String>(THEME_KEY).as_deref() {
            Ok("dark") => Theme::Dark,
            _ => Theme::Light,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// The photo currently staged for prediction, already read as a data URL.
pub struct SelectedImage {
    pub name: String,
    pub data_url: String,
}

pub enum Msg {
    FileSelected(GlooFile),
    ImageRead(String, Result<String, String>),
    FindDisease,
    PredictionReceived(Result<PredictResponse, String>),
    Discard,

    SetError(Option<String>),
    SetDragging(bool),
    ToggleTheme,

    HandleDrop(DragEvent),
    HandlePaste(ClipboardEvent),
}

pub struct Model {
    image: Option<SelectedImage>,
    reader: Option<FileReader>,
    disease: Option<String>,
    loading: bool,
    error: Option<String>,
    is_dragging: bool,
    paste_listener: Option<EventListener>,
    theme: Theme,
}

impl Component for Model {
    type Message = Msg;
    type Properties = ();

    fn create(ctx: &Context<Self>) -> Self {
        let mut model = Self {
            image: None,
            reader: None,
            disease: None,
            loading: false,
            error: None,
            is_dragging: false,
            paste_listener: None,
            theme: Theme::from_storage(),
        };
        apply_theme(model.theme);

        if let Some(window) = web_sys::window() {
            let link = ctx.link().clone();
            let listener = EventListener::new(&window, "paste", move |event| {
                if let Some(clipboard_event) = event.dyn_ref::<ClipboardEvent>() {
                    link.send_message(Msg::HandlePaste(clipboard_event.clone()));
                }
            });
            model.paste_listener = Some(listener);
        }

        model
    }

    fn update(&mut self, ctx: &Context<Self>, msg: Self::Message) -> bool {
        match msg {
            Msg::FileSelected(file) => self.handle_file_selected(ctx, file),
            Msg::ImageRead(name, result) => self.handle_image_read(name, result),
            Msg::FindDisease => self.handle_find_disease(ctx),
            Msg::PredictionReceived(result) => self.handle_prediction(result),
            Msg::Discard => {
                self.reader = None;
                self.image = None;
                self.disease = None;
                self.error = None;
                true
            }

            Msg::SetError(error) => {
                self.error = error;
                self.loading = false;
                true
            }
            Msg::SetDragging(is_dragging) => {
                self.is_dragging = is_dragging;
                true
            }
            Msg::ToggleTheme => {
                self.theme = self.theme.toggled();
                apply_theme(self.theme);
                if let Err(e) = LocalStorage::set(THEME_KEY, self.theme.as_str()) {
                    log::warn!("Could not persist theme: {}", e);
                }
                true
            }

            Msg::HandleDrop(event) => {
                event.prevent_default();
                self.is_dragging = false;
                let file = event
                    .data_transfer()
                    .and_then(|transfer| transfer.files())
                    .and_then(|files| first_image_file(&files));
                self.accept_file(ctx, file)
            }
            Msg::HandlePaste(event) => {
                let file = event
                    .clipboard_data()
                    .and_then(|transfer| transfer.files())
                    .and_then(|files| first_image_file(&files));
                if file.is_some() {
                    event.prevent_default();
                    self.accept_file(ctx, file)
                } else {
                    false
                }
            }
        }
    }

    fn view(&self, ctx: &Context<Self>) -> Html {
        html! {
            <div class="container">
                { render_header() }
                { render_theme_toggle(self.theme, ctx.link()) }

                <main class="main-content">
                    { render_upload_section(self, ctx) }
                    { render_preview_area(self, ctx) }
                    { render_error_message(self) }
                    { render_results(self) }
                </main>

                <footer class="app-footer">
                    <p>{"Tomato leaf disease detection | Fullstack Rust WASM"}</p>
                </footer>
            </div>
        }
    }
}

impl Model {
    pub fn image(&self) -> Option<&SelectedImage> {
        self.image.as_ref()
    }

    pub fn disease(&self) -> Option<&str> {
        self.disease.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_dragging(&self) -> bool {
        self.is_dragging
    }

    fn accept_file(&mut self, ctx: &Context<Self>, file: Option<GlooFile>) -> bool {
        match file {
            Some(file) => ctx.link().send_message(Msg::FileSelected(file)),
            None => ctx
                .link()
                .send_message(Msg::SetError(Some(NOT_AN_IMAGE.into()))),
        }
        true
    }

    fn handle_file_selected(&mut self, ctx: &Context<Self>, file: GlooFile) -> bool {
        let name = file.name();
        let link = ctx.link().clone();

        self.error = None;
        self.disease = None;
        // Replacing the reader drops (and aborts) any read still in flight.
        self.reader = Some(read_as_data_url(&file, move |result| {
            link.send_message(Msg::ImageRead(name, result.map_err(|e| e.to_string())));
        }));
        true
    }

    fn handle_image_read(&mut self, name: String, result: Result<String, String>) -> bool {
        self.reader = None;
        match result {
            Ok(data_url) => {
                log::info!("Loaded {} ({} bytes as data URL)", name, data_url.len());
                self.image = Some(SelectedImage { name, data_url });
            }
            Err(e) => {
                self.error = Some(format!("Could not read {}: {}", name, e));
            }
        }
        true
    }

    fn handle_find_disease(&mut self, ctx: &Context<Self>) -> bool {
        let Some(image) = &self.image else {
            self.error = Some(NO_IMAGE_SELECTED.into());
            return true;
        };
        if self.loading {
            return false;
        }

        self.loading = true;
        self.error = None;
        self.disease = None;

        let data_url = image.data_url.clone();
        let link = ctx.link().clone();
        spawn_local(async move {
            let result = api::predict(data_url).await;
            link.send_message(Msg::PredictionReceived(result));
        });
        true
    }

    fn handle_prediction(&mut self, result: Result<PredictResponse, String>) -> bool {
        self.loading = false;
        match result {
            Ok(response) => self.disease = Some(response.disease),
            Err(e) => {
                gloo_console::error!(format!("Error predicting disease: {}", e));
                self.error = Some(format!("An error occurred while predicting disease: {}", e));
            }
        }
        true
    }
}

fn apply_theme(theme: Theme) {
    let Some(body) = web_sys::window()
        .and_then(|window| window.document())
        .and_then(|document| document.body())
    else {
        return;
    };

    let classes = body.class_list();
    let result = match theme {
        Theme::Dark => classes.add_1("dark-mode"),
        Theme::Light => classes.remove_1("dark-mode"),
    };
    if result.is_err() {
        log::warn!("Could not apply {} theme", theme.as_str());
    }
}

fn main() {
    wasm_logger::init(wasm_logger::Config::default());
    yew::Renderer::<Model>::new().render();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_name_only_the_offered_inputs() {
        for input in ["upload", "drop", "paste"] {
            assert!(NO_IMAGE_SELECTED.contains(input), "missing {}", input);
        }
        for prompt in [NO_IMAGE_SELECTED, NOT_AN_IMAGE] {
            assert!(!prompt.to_lowercase().contains("capture"), "{}", prompt);
        }
    }

    #[test]
    fn theme_toggles_back_and_forth() {
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
        assert_eq!(Theme::Dark.toggled().as_str(), "light");
    }
}
