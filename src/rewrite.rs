use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

pub const PLUGINFILE_PLACEHOLDER: &str = "@@PLUGINFILE@@/";

// path segment: encode everything that would split or terminate it
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>');

/// Where embedded files of a piece of content live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArea<'a> {
    pub context_id: i64,
    pub component: &'a str,
    pub filearea: &'a str,
    pub itemid: Option<i64>,
}

pub trait ContentRewriter: Send + Sync {
    fn rewrite(&self, content: &str, area: &FileArea<'_>) -> String;
}

/// Turns stored `@@PLUGINFILE@@/` placeholders into served file URLs.
pub struct PluginfileRewriter {
    wwwroot: String,
}

impl PluginfileRewriter {
    pub fn new(wwwroot: impl Into<String>) -> Self {
        let wwwroot = wwwroot.into();
        PluginfileRewriter {
            wwwroot: wwwroot.trim_end_matches('/').to_string(),
        }
    }

    fn base_url(&self, area: &FileArea<'_>) -> String {
        let mut url = format!(
            "{}/pluginfile.php/{}/{}/{}/",
            self.wwwroot,
            area.context_id,
            utf8_percent_encode(area.component, SEGMENT),
            utf8_percent_encode(area.filearea, SEGMENT),
        );
        if let Some(item) = area.itemid {
            url.push_str(&format!("{}/", item));
        }
        url
    }
}

impl ContentRewriter for PluginfileRewriter {
    fn rewrite(&self, content: &str, area: &FileArea<'_>) -> String {
        if !content.contains(PLUGINFILE_PLACEHOLDER) {
            return content.to_string();
        }
        content.replace(PLUGINFILE_PLACEHOLDER, &self.base_url(area))
    }
}
