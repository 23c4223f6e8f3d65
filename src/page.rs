use crate::config::Lang;

const TEMPLATE: &str = include_str!("../assets/upload.html");

/// translated strings substituted into the upload page
struct PageTexts {
    page_title: &'static str,
    heading: &'static str,
    select_files: &'static str,
    file_hint: &'static str,
    upload_btn: &'static str,
    uploading: &'static str,
    uploading_pct: &'static str,
    success_suffix: &'static str,
    upload_failed: &'static str,
    network_error: &'static str,
    cancelled: &'static str,
}

const JA: PageTexts = PageTexts {
    page_title: "File Bridge - アップロード",
    heading: "File Bridge",
    select_files: "ファイルを選択",
    file_hint: "画像・動画・PDF など",
    upload_btn: "アップロード",
    uploading: "アップロード中...",
    uploading_pct: "アップロード中... ",
    success_suffix: " 件のファイルをアップロードしました",
    upload_failed: "アップロードに失敗しました",
    network_error: "ネットワークエラーです。接続を確認してください。",
    cancelled: "アップロードがキャンセルされました。",
};

const EN: PageTexts = PageTexts {
    page_title: "File Bridge - Upload",
    heading: "File Bridge",
    select_files: "Select Files",
    file_hint: "Images, videos, PDFs, etc.",
    upload_btn: "Upload",
    uploading: "Uploading...",
    uploading_pct: "Uploading... ",
    success_suffix: " file(s) uploaded successfully!",
    upload_failed: "Upload failed",
    network_error: "Network error. Please check your connection.",
    cancelled: "Upload cancelled.",
};

fn texts(lang: Lang) -> &'static PageTexts {
    match lang {
        Lang::Ja => &JA,
        Lang::En => &EN,
    }
}

/// the upload page in the given language
pub fn render_upload_page(lang: Lang) -> String {
    let t = texts(lang);
    [
        ("{{lang}}", lang.as_str()),
        ("{{page_title}}", t.page_title),
        ("{{heading}}", t.heading),
        ("{{select_files}}", t.select_files),
        ("{{file_hint}}", t.file_hint),
        ("{{upload_btn}}", t.upload_btn),
        ("{{uploading}}", t.uploading),
        ("{{uploading_pct}}", t.uploading_pct),
        ("{{success_suffix}}", t.success_suffix),
        ("{{upload_failed}}", t.upload_failed),
        ("{{network_error}}", t.network_error),
        ("{{cancelled}}", t.cancelled),
    ]
    .into_iter()
    .fold(TEMPLATE.to_string(), |page, (key, value)| page.replace(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_each_language_without_placeholders() {
        for lang in [Lang::Ja, Lang::En] {
            let page = render_upload_page(lang);
            assert!(!page.contains("{{"), "unfilled placeholder for {:?}", lang);
            assert!(page.contains(&format!("<html lang=\"{}\">", lang.as_str())));
        }
    }

    #[test]
    fn uses_translations() {
        assert!(render_upload_page(Lang::En).contains("Select Files"));
        assert!(render_upload_page(Lang::Ja).contains("ファイルを選択"));
    }
}
