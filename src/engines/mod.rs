//! Reverse image search engine implementations.

use std::sync::Arc;

use crate::engine::DynEngine;
use crate::http::HttpClient;
use crate::{Result, SearchError};

// Anime and illustration engines
pub mod anime_trace;
pub mod ascii2d;
pub mod ehentai;
pub mod iqdb;
pub mod saucenao;
pub mod tracemoe;

// General web engines
pub mod baidu;
pub mod bing;
pub mod copyseeker;
pub mod google;
pub mod google_lens;
pub mod lenso;
pub mod tineye;
pub mod yandex;

pub use anime_trace::{AnimeTrace, AnimeTraceResponse};
pub use ascii2d::{Ascii2d, Ascii2dResponse};
pub use baidu::{Baidu, BaiduResponse};
pub use bing::{Bing, BingResponse};
pub use copyseeker::{Copyseeker, CopyseekerResponse};
pub use ehentai::{EHentai, EHentaiResponse};
pub use google::{Google, GoogleResponse};
pub use google_lens::{GoogleLens, GoogleLensResponse};
pub use iqdb::{Iqdb, IqdbResponse};
pub use lenso::{Lenso, LensoResponse};
pub use saucenao::{SauceNao, SauceNaoResponse};
pub use tineye::{Tineye, TineyeResponse};
pub use tracemoe::{TraceMoe, TraceMoeResponse};
pub use yandex::{Yandex, YandexResponse};

/// Shortcut and description of every engine [`build`] knows.
pub const AVAILABLE: &[(&str, &str)] = &[
    ("at", "AnimeTrace (anime character recognition)"),
    ("a2d", "Ascii2D (illustrations, color search)"),
    ("bd", "Baidu image search"),
    ("bi", "Bing visual search"),
    ("cs", "Copyseeker"),
    ("eh", "E-Hentai"),
    ("ex", "ExHentai (needs cookies)"),
    ("g", "Google"),
    ("gl", "Google Lens"),
    ("iq", "IQDB (anime boorus)"),
    ("iq3", "IQDB 3D"),
    ("ls", "Lenso"),
    ("sn", "SauceNAO"),
    ("te", "Tineye"),
    ("tm", "trace.moe (anime scenes)"),
    ("ya", "Yandex"),
];

/// Builds an engine with default options from its shortcut or lowercase name.
pub fn build(name: &str, client: Arc<dyn HttpClient>) -> Result<Arc<dyn DynEngine>> {
    let engine: Arc<dyn DynEngine> = match name.to_lowercase().as_str() {
        "at" | "animetrace" => Arc::new(AnimeTrace::new(client)),
        "a2d" | "ascii2d" => Arc::new(Ascii2d::new(client)),
        "bd" | "baidu" => Arc::new(Baidu::new(client)),
        "bi" | "bing" => Arc::new(Bing::new(client)),
        "cs" | "copyseeker" => Arc::new(Copyseeker::new(client)),
        "eh" | "ehentai" => Arc::new(EHentai::new(client)),
        "ex" | "exhentai" => Arc::new(EHentai::new_ex(client)),
        "g" | "google" => Arc::new(Google::new(client)),
        "gl" | "googlelens" => Arc::new(GoogleLens::new(client)),
        "iq" | "iqdb" => Arc::new(Iqdb::new(client)),
        "iq3" | "iqdb3d" => Arc::new(Iqdb::new_3d(client)),
        "ls" | "lenso" => Arc::new(Lenso::new(client)),
        "sn" | "saucenao" => Arc::new(SauceNao::new(client)),
        "te" | "tineye" => Arc::new(Tineye::new(client)),
        "tm" | "tracemoe" => Arc::new(TraceMoe::new(client)),
        "ya" | "yandex" => Arc::new(Yandex::new(client)),
        other => {
            return Err(SearchError::InvalidArgument(format!(
                "unknown engine '{other}', run `picsearch engines` for the list"
            )))
        }
    };
    Ok(engine)
}
