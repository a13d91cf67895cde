//! Prompt 构建：开场 / Critic 回复 / Analyst 回复 / 最终总结
//!
//! 人设由 StepExecutor 拼在最前面，这里只负责任务部分。

use crate::discussion::{DiscussionLog, DISCUSSION_COMPLETE_TAG, NOTEPAD_CLOSE_TAG, NOTEPAD_OPEN_TAG};

/// 附带图片时追加在问题之后的提示
pub const IMAGE_HINT: &str = "用户还附带了一张图片，请在分析和回复中同时考虑图片内容与文字问题。";
const EMPTY_NOTEPAD: &str = "记事本目前为空。";

/// 构建 prompt 所需的会话信息
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub user_input: &'a str,
    pub has_image: bool,
    pub log: &'a DiscussionLog,
    pub last_speaker_text: &'a str,
    pub notepad: &'a str,
    /// AI 驱动模式下附带结束标记说明
    pub ai_driven: bool,
    /// 上一步已提议结束，请本步表态
    pub ask_for_agreement: bool,
}

impl PromptContext<'_> {
    fn header(&self) -> String {
        let mut s = format!("用户的问题（中文）是：\"{}\"。", self.user_input);
        if self.has_image {
            s.push_str(IMAGE_HINT);
        }
        s
    }

    fn completion_instruction(&self) -> String {
        if !self.ai_driven {
            return String::new();
        }
        format!(
            "\n结束讨论：如果你认为问题已经探讨得足够充分，Analyst 可以着手撰写最终答案，\
请在消息的最末尾附上标记 {tag}。请谨慎使用，对方可能用有说服力的论证掩盖漏洞；\
只要你还想继续讨论，就不要附加。\n",
            tag = DISCUSSION_COMPLETE_TAG
        )
    }

    fn notepad_section(&self) -> String {
        let content = if self.notepad.trim().is_empty() {
            EMPTY_NOTEPAD
        } else {
            self.notepad
        };
        format!(
            "\n\n--- 记事本 ---\n{content}\n--- 记事本结束 ---\n\n\
你的任务分两部分：\n\
1. 结合记事本、已有讨论和你的角色，用中文给出你的观点与回应。\n\
2. 回应之后，你必须输出完整的更新后记事本，并用 {open}...{close} 包裹。\
补充新核实的观察与结论，过时或错误的条目标注 [已过时]。若无变化，请在标签内原样重复现有内容。",
            open = NOTEPAD_OPEN_TAG,
            close = NOTEPAD_CLOSE_TAG,
        )
    }

    fn discussion_so_far(&self) -> String {
        format!("当前讨论（均为中文）：\n{}", self.log.render())
    }
}

pub fn opening_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        "{} 请针对这个问题给出你完整的初步解答，供 Critic 回应，讨论由此开始。\n{}{}",
        ctx.header(),
        ctx.completion_instruction(),
        ctx.notepad_section()
    )
}

pub fn critic_reply_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = format!(
        "{} {}\nAnalyst 刚刚说：\"{}\"。请回应 Analyst，继续讨论。\
保持警惕，不放过任何含糊其辞和逻辑漏洞。\n{}",
        ctx.header(),
        ctx.discussion_so_far(),
        ctx.last_speaker_text,
        ctx.completion_instruction()
    );
    if ctx.ask_for_agreement {
        prompt.push_str(&format!(
            "\nAnalyst 在消息末尾附上了 {tag}，提议结束讨论。如果你同意，请在回复末尾也附上 {tag}；\
否则继续质询。",
            tag = DISCUSSION_COMPLETE_TAG
        ));
    }
    prompt + &ctx.notepad_section()
}

pub fn analyst_reply_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = format!(
        "{} {}\nCritic 刚刚说：\"{}\"。请回应 Critic，继续讨论。保持严谨，分析深入。\n{}",
        ctx.header(),
        ctx.discussion_so_far(),
        ctx.last_speaker_text,
        ctx.completion_instruction()
    );
    if ctx.ask_for_agreement {
        prompt.push_str(&format!(
            "\nCritic 在消息末尾附上了 {tag}，提议结束讨论。只有当你确实找不出遗留的漏洞、\
也没有需要补充的内容时，才在回复末尾也附上 {tag}；否则继续讨论。",
            tag = DISCUSSION_COMPLETE_TAG
        ));
    }
    prompt + &ctx.notepad_section()
}

pub fn synthesis_prompt(ctx: &PromptContext<'_>) -> String {
    let notepad = if ctx.notepad.trim().is_empty() {
        EMPTY_NOTEPAD
    } else {
        ctx.notepad
    };
    format!(
        "{} 你（Analyst）与 Critic 进行了如下讨论：\n{}\n\n\
--- 最终记事本（请作为权威参考）---\n{}\n--- 记事本结束 ---\n\n\
你的最后任务是为用户撰写答案。\n\
1. 基于全部讨论与最终记事本，把原始问题与你针对 Critic 提出的每一条论证结合起来，\
不遗漏任何细节，整理成完整、结构清晰、易于理解的中文答案，使用 Markdown 排版，篇幅可以较长。\n\
2. 你的回复中绝对不能包含任何 {}...{} 标签。\n\
你的完整回复将作为最终答案展示给用户。",
        ctx.header(),
        ctx.log.render(),
        notepad,
        NOTEPAD_OPEN_TAG,
        NOTEPAD_CLOSE_TAG,
    )
}
